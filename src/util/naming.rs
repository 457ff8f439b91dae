use crate::sem::RunType;

/// Name for the anonymous temporary slot of a given type. The leading `.`
/// cannot appear in a source identifier, so these never collide with user
/// locals; one slot per type is enough because every temporary is reloaded
/// immediately after it is written.
pub fn temp_name(ty: RunType) -> String {
    format!(".{}", ty)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temp_names() {
        assert_eq!(temp_name(RunType::I32), ".i32");
        assert_eq!(temp_name(RunType::F64), ".f64");
    }
}
