use awl::syntax::Tokenizer;
use clap::{App, Arg};
use std::fs;
use std::io::{self, Read, Write};
use std::process;

fn main() {
    env_logger::init();

    let matches = App::new("awl")
        .about("Compiles awl source into a WebAssembly module")
        .arg(
            Arg::with_name("INPUT")
                .help("Sets the input file to use; stdin when omitted")
                .required(false)
                .index(1),
        )
        .arg(
            Arg::with_name("output")
                .short("o")
                .long("output")
                .takes_value(true)
                .help("Write the module here instead of stdout"),
        )
        .arg(
            Arg::with_name("tokens")
                .long("tokens")
                .help("Dump the token stream instead of compiling"),
        )
        .arg(
            Arg::with_name("ast")
                .long("ast")
                .help("Dump the syntax tree instead of compiling"),
        )
        .get_matches();

    let source = match read_source(matches.value_of("INPUT")) {
        Ok(source) => source,
        Err(error) => {
            eprintln!("error: {}", error);
            process::exit(1);
        }
    };

    if matches.is_present("tokens") {
        for token in Tokenizer::from_string(&source).tokens() {
            println!("{:?} `{}` @{}+{}", token.kind, token.text, token.offset, token.len);
        }
        return;
    }

    if matches.is_present("ast") {
        match awl::parse(&source) {
            Ok(ast) => print!("{}", ast.dump()),
            Err(error) => {
                eprintln!("error: {}", error);
                process::exit(1);
            }
        }
        return;
    }

    let bytes = match awl::compile(&source) {
        Ok(bytes) => bytes,
        Err(error) => {
            eprintln!("error: {}", error);
            process::exit(1);
        }
    };

    let result = match matches.value_of("output") {
        Some(path) => fs::write(path, &bytes),
        None => io::stdout().write_all(&bytes),
    };
    if let Err(error) = result {
        eprintln!("error: {}", error);
        process::exit(1);
    }
}

fn read_source(input: Option<&str>) -> io::Result<String> {
    match input {
        Some(path) => fs::read_to_string(path),
        None => {
            let mut source = String::new();
            io::stdin().read_to_string(&mut source)?;
            Ok(source)
        }
    }
}
