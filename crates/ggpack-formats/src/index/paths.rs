//! Path fragment bytecode
//!
//! Logical paths are stored as a small program per path group. Each command
//! is a little-endian `u32`:
//!
//! - `0` toggles between the emission phase and the base phase. Entering the
//!   base phase clears the base stack. Programs start in the emission phase.
//! - `n > 0` is followed by a NUL-terminated fragment. The full path is
//!   `bases[n - 1] + fragment`, or the fragment alone when `n - 1` is past the
//!   end of the stack. In the base phase the path is pushed onto the stack,
//!   otherwise it is emitted.

use crate::codec::ByteCursor;

/// Decode one path program
pub fn decode_paths(program: &[u8]) -> Vec<String> {
    let mut cursor = ByteCursor::new(program);
    let mut base_phase = false;
    let mut bases: Vec<String> = Vec::new();
    let mut results = Vec::new();

    while let Ok(cmd) = cursor.u32() {
        if cmd == 0 {
            base_phase = !base_phase;
            if base_phase {
                bases.clear();
            }
            continue;
        }

        let fragment = String::from_utf8_lossy(cursor.c_bytes(program.len()));
        let full = match bases.get(cmd as usize - 1) {
            Some(base) => format!("{base}{fragment}"),
            None => fragment.into_owned(),
        };
        if base_phase {
            bases.push(full);
        } else {
            results.push(full);
        }
    }

    results
}

/// Encoder for path programs
#[derive(Debug, Default, Clone)]
pub struct PathProgram {
    bytes: Vec<u8>,
}

impl PathProgram {
    /// Start an empty program
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a phase toggle
    pub fn toggle(&mut self) -> &mut Self {
        self.bytes.extend_from_slice(&0u32.to_le_bytes());
        self
    }

    /// Emit a fragment joined to the one-based base `base`; a base past the
    /// end of the stack means no prefix
    pub fn fragment(&mut self, base: u32, fragment: &str) -> &mut Self {
        self.bytes.extend_from_slice(&base.to_le_bytes());
        self.bytes.extend_from_slice(fragment.as_bytes());
        self.bytes.push(0);
        self
    }

    /// Encoded program
    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_base_then_emit() {
        let mut program = PathProgram::new();
        program
            .toggle()
            .fragment(1, "Art/")
            .fragment(1, "Textures/")
            .toggle()
            .fragment(1, "a.dds")
            .fragment(2, "b.dds");
        let paths = decode_paths(&program.into_bytes());
        assert_eq!(paths, vec!["Art/a.dds", "Art/Textures/b.dds"]);
    }

    #[test]
    fn test_base_chain_builds_on_previous_base() {
        let mut program = PathProgram::new();
        program
            .toggle()
            .fragment(1, "Data/")
            .fragment(1, "Sub/")
            .toggle()
            .fragment(2, "x.dat");
        // second base resolves against the first: "Data/" + "Sub/"
        assert_eq!(decode_paths(&program.into_bytes()), vec!["Data/Sub/x.dat"]);
    }

    #[test]
    fn test_out_of_range_base_uses_fragment_alone() {
        let mut program = PathProgram::new();
        program.fragment(1, "root.txt").fragment(7, "other.txt");
        assert_eq!(
            decode_paths(&program.into_bytes()),
            vec!["root.txt", "other.txt"]
        );
    }

    #[test]
    fn test_reentering_base_phase_clears_stack() {
        let mut program = PathProgram::new();
        program
            .toggle()
            .fragment(1, "A/")
            .toggle()
            .fragment(1, "one")
            .toggle()
            .fragment(5, "B/")
            .toggle()
            .fragment(1, "two");
        assert_eq!(decode_paths(&program.into_bytes()), vec!["A/one", "B/two"]);
    }

    #[test]
    fn test_unterminated_fragment_and_trailing_bytes() {
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend_from_slice(b"tail");
        assert_eq!(decode_paths(&bytes), vec!["tail"]);

        let mut short = PathProgram::new();
        short.fragment(1, "x");
        let mut bytes = short.into_bytes();
        bytes.extend_from_slice(&[0, 0]);
        assert_eq!(decode_paths(&bytes), vec!["x"]);
    }
}
