//! Whitespace text decoder.
//!
//! Every character outside the token set {space, tab, newline} is commentary
//! and dropped before decoding. The remaining tokens form a prefix code: an
//! IMP category prefix (1-2 tokens), an opcode (1-3 tokens), and for some
//! opcodes a parameter encoded as a run of space/tab bits (space = 0,
//! tab = 1) terminated by a newline.

use std::fs;
use std::path::Path;

use crate::errors::ParserError;
use crate::instruction::{Imp, Instruction, Opcode, ParamKind};

/// Decode a program from source text.
pub fn parse_code(code: &str) -> Result<Vec<Instruction>, ParserError> {
    let tokens: Vec<u8> = code
        .bytes()
        .filter(|b| matches!(b, b' ' | b'\t' | b'\n'))
        .collect();

    let mut cursor = Cursor {
        tokens: &tokens,
        pos: 0,
    };
    let mut instructions = Vec::new();
    while !cursor.at_end() {
        instructions.push(cursor.next_instruction()?);
    }
    Ok(instructions)
}

/// Read and decode a program file.
pub fn parse_file(path: impl AsRef<Path>) -> Result<Vec<Instruction>, ParserError> {
    let code = fs::read_to_string(path)?;
    parse_code(&code)
}

struct Cursor<'a> {
    tokens: &'a [u8],
    pos: usize,
}

impl Cursor<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<u8> {
        self.tokens.get(self.pos).copied()
    }

    fn next_instruction(&mut self) -> Result<Instruction, ParserError> {
        let imp = self.imp()?;
        let opcode = self.opcode(imp)?;
        let parameter = match opcode.param_kind() {
            Some(kind) => Some(self.parameter(kind)?),
            None => None,
        };
        Ok(Instruction::new(opcode, parameter))
    }

    fn imp(&mut self) -> Result<Imp, ParserError> {
        let offset = self.pos;
        match self.take() {
            Some(b' ') => Ok(Imp::StackManipulation),
            Some(b'\n') => Ok(Imp::FlowControl),
            Some(b'\t') => match self.take() {
                Some(b' ') => Ok(Imp::Arithmetic),
                Some(b'\n') => Ok(Imp::Io),
                Some(b'\t') => Ok(Imp::HeapAccess),
                _ => Err(ParserError::UnknownImp { offset }),
            },
            _ => Err(ParserError::UnknownImp { offset }),
        }
    }

    fn opcode(&mut self, imp: Imp) -> Result<Opcode, ParserError> {
        let offset = self.pos;
        let unknown = Err(ParserError::UnknownOpcode { offset });
        match imp {
            Imp::Io => match (self.take(), self.take()) {
                (Some(b'\t'), Some(b' ')) => Ok(Opcode::ReadChar),
                (Some(b'\t'), Some(b'\t')) => Ok(Opcode::ReadNumber),
                (Some(b' '), Some(b' ')) => Ok(Opcode::PrintChar),
                (Some(b' '), Some(b'\t')) => Ok(Opcode::PrintNumber),
                _ => unknown,
            },
            Imp::StackManipulation => match self.take() {
                Some(b' ') => Ok(Opcode::Push),
                Some(b'\n') => match self.take() {
                    Some(b' ') => Ok(Opcode::DupTop),
                    Some(b'\t') => Ok(Opcode::SwapTop2),
                    Some(b'\n') => Ok(Opcode::DiscardTop),
                    _ => unknown,
                },
                Some(b'\t') => match self.take() {
                    Some(b' ') => Ok(Opcode::CopyToTop),
                    Some(b'\n') => Ok(Opcode::SlideNOff),
                    _ => unknown,
                },
                _ => unknown,
            },
            Imp::Arithmetic => match (self.take(), self.take()) {
                (Some(b' '), Some(b' ')) => Ok(Opcode::Add),
                (Some(b' '), Some(b'\t')) => Ok(Opcode::Sub),
                (Some(b' '), Some(b'\n')) => Ok(Opcode::Mul),
                (Some(b'\t'), Some(b' ')) => Ok(Opcode::Div),
                (Some(b'\t'), Some(b'\t')) => Ok(Opcode::Mod),
                _ => unknown,
            },
            Imp::FlowControl => match (self.take(), self.take()) {
                (Some(b' '), Some(b' ')) => Ok(Opcode::Mark),
                (Some(b' '), Some(b'\t')) => Ok(Opcode::Call),
                (Some(b' '), Some(b'\n')) => Ok(Opcode::Jump),
                (Some(b'\t'), Some(b' ')) => Ok(Opcode::JumpIfZero),
                (Some(b'\t'), Some(b'\t')) => Ok(Opcode::JumpIfNegative),
                (Some(b'\t'), Some(b'\n')) => Ok(Opcode::Return),
                (Some(b'\n'), Some(b'\n')) => Ok(Opcode::Exit),
                _ => unknown,
            },
            Imp::HeapAccess => match self.take() {
                Some(b' ') => Ok(Opcode::Store),
                Some(b'\t') => Ok(Opcode::Retrieve),
                _ => unknown,
            },
        }
    }

    /// Decode a bit-run parameter: space/tab bits up to a terminating
    /// newline. An empty run (immediate newline or end of input) is an
    /// error.
    fn parameter(&mut self, kind: ParamKind) -> Result<i64, ParserError> {
        let offset = self.pos;
        let mut bits: Vec<u8> = Vec::new();
        loop {
            match self.take() {
                Some(b' ') => bits.push(0),
                Some(b'\t') => bits.push(1),
                Some(b'\n') => break,
                _ => return Err(ParserError::UnknownParameter { offset }),
            }
        }
        if bits.is_empty() {
            return Err(ParserError::UnknownParameter { offset });
        }

        match kind {
            ParamKind::Number => {
                // First bit is the sign; an empty magnitude encodes zero.
                let magnitude = decode_bits(&bits[1..], offset)?;
                if bits[0] == 1 {
                    Ok(-magnitude)
                } else {
                    Ok(magnitude)
                }
            }
            ParamKind::Label => decode_bits(&bits, offset),
        }
    }

    fn take(&mut self) -> Option<u8> {
        let token = self.peek()?;
        self.pos += 1;
        Some(token)
    }
}

fn decode_bits(bits: &[u8], offset: usize) -> Result<i64, ParserError> {
    let mut value: i64 = 0;
    for &bit in bits {
        value = value
            .checked_mul(2)
            .and_then(|v| v.checked_add(i64::from(bit)))
            .ok_or(ParserError::ParameterDecode { offset })?;
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_positive_literal() {
        // Stack IMP, PUSH, sign 0, magnitude 1.
        let instructions = parse_code("   \t\n").unwrap();
        assert_eq!(
            instructions,
            vec![Instruction::new(Opcode::Push, Some(1))]
        );
    }

    #[test]
    fn push_negative_literal() {
        // Sign bit set, magnitude 11b.
        let instructions = parse_code("  \t\t\t\n").unwrap();
        assert_eq!(instructions[0].parameter, Some(-3));
    }

    #[test]
    fn push_sign_only_is_zero() {
        let instructions = parse_code("   \n").unwrap();
        assert_eq!(instructions[0].parameter, Some(0));
    }

    #[test]
    fn label_uses_every_bit() {
        // Flow IMP, MARK, label 101b.
        let instructions = parse_code("\n  \t \t\n").unwrap();
        assert_eq!(
            instructions,
            vec![Instruction::new(Opcode::Mark, Some(5))]
        );
    }

    #[test]
    fn comment_characters_are_dropped() {
        let instructions = parse_code("push ->   one:\t!\n").unwrap();
        assert_eq!(
            instructions,
            vec![Instruction::new(Opcode::Push, Some(1))]
        );
    }

    #[test]
    fn small_program_decodes() {
        // PUSH 1, PRINT_CHAR, EXIT.
        let instructions = parse_code("   \t\n\t\n  \n\n\n").unwrap();
        let opcodes: Vec<Opcode> = instructions.iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![Opcode::Push, Opcode::PrintChar, Opcode::Exit]
        );
    }

    #[test]
    fn truncated_imp_is_rejected() {
        assert!(matches!(
            parse_code("\t"),
            Err(ParserError::UnknownImp { offset: 0 })
        ));
    }

    #[test]
    fn truncated_opcode_is_rejected() {
        // Flow IMP with a single trailing token.
        assert!(matches!(
            parse_code("\n "),
            Err(ParserError::UnknownOpcode { offset: 1 })
        ));
    }

    #[test]
    fn missing_parameter_is_rejected() {
        // PUSH followed by an immediate newline: empty bit run.
        assert!(matches!(
            parse_code("  \n"),
            Err(ParserError::UnknownParameter { .. })
        ));
    }

    #[test]
    fn oversized_parameter_is_rejected() {
        // A magnitude of 70 one-bits cannot fit a machine integer.
        let mut code = String::from("   ");
        code.push_str(&"\t".repeat(70));
        code.push('\n');
        assert!(matches!(
            parse_code(&code),
            Err(ParserError::ParameterDecode { .. })
        ));
    }

    #[test]
    fn file_round_trip() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"   \t\n\n\n\n").unwrap();
        let instructions = parse_file(file.path()).unwrap();
        assert_eq!(instructions.len(), 2);
        assert_eq!(instructions[1].opcode, Opcode::Exit);
    }
}
