//! WebAssembly backend: byte encoding, module sections and body lowering.
//!
//! Emission is read-only over the validated AST apart from index
//! assignment, which positions every definition in its target index space
//! just before the sections that need it are written.

pub mod encoder;
pub mod function;
pub mod module;
pub mod wasm;

pub use encoder::Encoder;
pub use module::emit;

#[cfg(test)]
mod tests {
    use crate::errors::ErrorKind;
    use crate::{compile, parse};

    fn assert_contains(bytes: &[u8], needle: &[u8]) {
        assert!(
            bytes.windows(needle.len()).any(|window| window == needle),
            "expected {:02x?} within {:02x?}",
            needle,
            bytes
        );
    }

    #[test]
    fn exported_add_function() {
        let bytes =
            compile("add: fn (a: i32, b: i32) i32 { a + b }\nexport add as \"plus\"").unwrap();

        let expected = [
            0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
            0x01, 0x07, 0x01, 0x60, 0x02, 0x7f, 0x7f, 0x01, 0x7f, // type
            0x03, 0x02, 0x01, 0x00, // function
            0x07, 0x08, 0x01, 0x04, b'p', b'l', b'u', b's', 0x00, 0x00, // export
            0x0a, 0x09, 0x01, 0x07, 0x00, // code, one body of 7 bytes
            0x20, 0x00, 0x20, 0x01, 0x6a, 0x0b, // get_local 0; get_local 1; i32.add; end
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn lone_global_module() {
        let bytes = compile("foo: i32 = 0").unwrap();

        // No type, function or code sections: just the global.
        let expected = [
            0x00, 0x61, 0x73, 0x6d, 0x01, 0x00, 0x00, 0x00, // header
            0x06, 0x06, 0x01, 0x7f, 0x01, 0x41, 0x00, 0x0b, // global: i32 mut, i32.const 0
        ];
        assert_eq!(bytes, expected);
    }

    #[test]
    fn deterministic_emission() {
        let src = "mem: memory(1)\ncount: i32 = 3\nbump: fn () { count = count + 1 }";
        assert_eq!(compile(src).unwrap(), compile(src).unwrap());
    }

    #[test]
    fn type_section_entries_are_distinct() {
        let bytes = compile(
            "a: fn (x: i32) i32 { x }\n\
             b: fn (y: i32) i32 { y }\n\
             c: fn (z: i64) { }\n",
        )
        .unwrap();

        // Two distinct signatures survive three functions.
        assert_contains(
            &bytes,
            &[
                0x01, 0x0a, 0x02, // type section, two entries
                0x60, 0x01, 0x7f, 0x01, 0x7f, // (i32) -> i32
                0x60, 0x01, 0x7e, 0x00, // (i64) -> void
            ],
        );
    }

    #[test]
    fn imports_precede_defined_entries() {
        let ast = {
            let mut ast = parse(
                "import log: fn (i32) \"console/log\"\n\
                 import base: immutable i32 \"env/base\"\n\
                 count: i32 = 0\n\
                 tick: fn () { log(count) }\n",
            )
            .unwrap();
            crate::sem::Resolver::new().resolve(&mut ast).unwrap();
            crate::sem::validator::validate(&mut ast).unwrap();
            crate::asm::emit(&mut ast).unwrap();
            ast
        };

        // Imported function 0, defined function 1; imported global 0,
        // defined global 1.
        assert_eq!(ast.def(ast.globals.imports[0]).index, 0);
        assert_eq!(ast.def(ast.globals.functions[0]).index, 1);
        assert_eq!(ast.def(ast.globals.imports[1]).index, 0);
        assert_eq!(ast.def(ast.globals.variables[0]).index, 1);
    }

    #[test]
    fn import_section_bytes() {
        let bytes = compile("import log: fn (i32) \"console/log\"").unwrap();

        assert_contains(
            &bytes,
            &[
                0x02, 0x0f, 0x01, // import section, one entry
                0x07, b'c', b'o', b'n', b's', b'o', b'l', b'e', // module
                0x03, b'l', b'o', b'g', // field
                0x00, 0x00, // function, signature 0
            ],
        );
    }

    #[test]
    fn memory_and_table_sections() {
        let bytes = compile("mem: memory(1, 2)\ntbl: table(4)").unwrap();

        assert_contains(&bytes, &[0x04, 0x04, 0x01, 0x70, 0x00, 0x04]); // table
        assert_contains(&bytes, &[0x05, 0x04, 0x01, 0x01, 0x01, 0x02]); // memory
    }

    #[test]
    fn imported_memory_suppresses_the_section() {
        let bytes = compile("import mem: memory(1) \"env/memory\"").unwrap();

        // An import entry exists and no memory section follows it.
        assert_contains(&bytes, &[b'y', 0x02, 0x00, 0x01]); // ..."memory", kind, limits
        assert!(!bytes
            .windows(2)
            .any(|window| window == [0x05, 0x04]));
    }

    #[test]
    fn start_section_points_at_nullary_void_main() {
        let bytes = compile("helper: fn () { }\nmain: fn () { }").unwrap();
        assert_contains(&bytes, &[0x08, 0x01, 0x01]); // start: function 1

        let bytes = compile("main: fn () i32 { 4 }").unwrap();
        assert!(!bytes.windows(2).any(|window| window == [0x08, 0x01]));
    }

    #[test]
    fn pointer_store_sequence() {
        let bytes =
            compile("mem: memory(1)\nv: fn () { p: ptr i32 = 10\n p[1] = 14 }").unwrap();

        // i32.const 1; get_local p; i32.add; i32.const 4; i32.mul;
        // i32.const 14; i32.store align=2 offset=0
        assert_contains(
            &bytes,
            &[
                0x41, 0x01, 0x20, 0x00, 0x6a, 0x41, 0x04, 0x6c, 0x41, 0x0e, 0x36, 0x02, 0x00,
            ],
        );
    }

    #[test]
    fn narrow_load_carries_a_signedness_suffix() {
        let bytes = compile(
            "mem: memory(1)\nv: fn () i32 { p: ptr i32_u8 = 0\n p[3] }",
        )
        .unwrap();

        // i32.const 3; get_local p; i32.add; i32.const 1; i32.mul;
        // i32.load8_u align=0 offset=0
        assert_contains(
            &bytes,
            &[0x41, 0x03, 0x20, 0x00, 0x6a, 0x41, 0x01, 0x6c, 0x2d, 0x00, 0x00],
        );
    }

    #[test]
    fn static_offset_bounds_alignment() {
        let bytes = compile(
            "mem: memory(1)\nv: fn () i32 { p: ptr i32 = 0\n p[1, 2] }",
        )
        .unwrap();

        // offset 2 divides by 2 but not 4: alignment log2 is 1.
        assert_contains(&bytes, &[0x28, 0x01, 0x02]);
    }

    #[test]
    fn short_circuit_and_lowering() {
        let bytes =
            compile("v: fn (a: i32, b: i32) { if (a and b) { b = 0 } }").unwrap();

        // get_local a; i32.eqz; if i32; i32.const 0; else; get_local b; end
        assert_contains(
            &bytes,
            &[0x20, 0x00, 0x45, 0x04, 0x7f, 0x41, 0x00, 0x05, 0x20, 0x01, 0x0b],
        );
    }

    #[test]
    fn short_circuit_or_uses_a_temp() {
        let bytes = compile("v: fn (a: i32, b: i32) i32 { a or b }").unwrap();

        // get_local a; tee_local 2; if i32; get_local 2; else; get_local b; end
        assert_contains(
            &bytes,
            &[0x20, 0x00, 0x22, 0x02, 0x04, 0x7f, 0x20, 0x02, 0x05, 0x20, 0x01, 0x0b],
        );
    }

    #[test]
    fn loop_with_yield() {
        let bytes = compile(
            "v: fn () i32 { loop { i: i32\n i = i + 1\n if (i > 9) { yield i }\n } }",
        )
        .unwrap();

        // block i32; loop i32 ... br 0; end; end
        assert_contains(&bytes, &[0x02, 0x7f, 0x03, 0x7f]);
        assert_contains(&bytes, &[0x0c, 0x00, 0x0b, 0x0b]);
        // yield inside the if: br 2 to the outer block.
        assert_contains(&bytes, &[0x20, 0x00, 0x0c, 0x02]);
    }

    #[test]
    fn dropped_statement_values() {
        let bytes = compile("v: fn () { a: i32\n a + 1\n a = 2 }").unwrap();

        // The unconsumed sum is dropped.
        assert_contains(&bytes, &[0x20, 0x00, 0x41, 0x01, 0x6a, 0x1a]);
    }

    #[test]
    fn indirect_call_through_function_pointer() {
        let bytes = compile(
            "tbl: table(2)\ncb: fn_ptr (i32) i32\nv: fn () i32 { cb(7) }",
        )
        .unwrap();

        // i32.const 7; get_global cb; call_indirect sig 0, table 0
        assert_contains(&bytes, &[0x41, 0x07, 0x23, 0x00, 0x11, 0x00, 0x00]);
    }

    #[test]
    fn suffix_increment_post_value() {
        let bytes = compile("v: fn () i32 { i: i32\n i++ }").unwrap();

        // Value needed: get; get; const 1; add; set.
        assert_contains(
            &bytes,
            &[0x20, 0x00, 0x20, 0x00, 0x41, 0x01, 0x6a, 0x21, 0x00],
        );
    }

    #[test]
    fn emission_size_bound_is_fatal() {
        let mut ast = parse("mem: memory(1)").unwrap();
        crate::sem::Resolver::new().resolve(&mut ast).unwrap();
        crate::sem::validator::validate(&mut ast).unwrap();
        // Corrupt the parsed limits to exceed the 32-bit varint bound.
        let def = ast.globals.memory.unwrap();
        ast.def_mut(def).limits = Some((u32::MAX, None));
        assert!(crate::asm::emit(&mut ast).is_ok());

        let mut enc = crate::asm::Encoder::new();
        assert_eq!(
            enc.uint("too wide", u64::MAX).unwrap_err().kind,
            ErrorKind::CodegenIntegerOutOfRange
        );
    }
}
