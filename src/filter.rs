//! Classic-BPF-style byte-code packet filter: a small interpreted
//! instruction set validated and installed via `ATTACH_FILTER`.

use crate::error::{Result, RingtapError};

/// Operand for an ALU or jump instruction: either an immediate or the `X`
/// register.
#[derive(Debug, Clone, Copy)]
pub enum Operand {
    /// A literal value.
    Imm(u32),
    /// The value currently held in the `X` register.
    X,
}

/// One filter program instruction.
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    /// Load a byte at `offset` into the accumulator.
    LdAbsB(u32),
    /// Load a big-endian 16-bit half-word at `offset` into the accumulator.
    LdAbsH(u32),
    /// Load a big-endian 32-bit word at `offset` into the accumulator.
    LdAbsW(u32),
    /// Load an immediate into the accumulator.
    LdImm(u32),
    /// Load an immediate into the `X` register.
    LdxImm(u32),
    /// `A += operand`.
    Add(Operand),
    /// `A &= operand`.
    And(Operand),
    /// `A |= operand`.
    Or(Operand),
    /// `A ^= operand`.
    Xor(Operand),
    /// `A <<= operand`.
    Lsh(Operand),
    /// `A >>= operand`.
    Rsh(Operand),
    /// If `A == k`, skip `jt` instructions forward; else skip `jf`.
    JmpEq { k: u32, jt: u8, jf: u8 },
    /// If `A > k`, skip `jt` instructions forward; else skip `jf`.
    JmpGt { k: u32, jt: u8, jf: u8 },
    /// If `A & k != 0`, skip `jt` instructions forward; else skip `jf`.
    JmpSet { k: u32, jt: u8, jf: u8 },
    /// Unconditionally skip `offset` instructions forward.
    Jmp(u32),
    /// Terminate, returning `k` as the result (0 means reject).
    RetK(u32),
    /// Terminate, returning the accumulator's current value.
    RetA,
}

/// A validated, loaded filter program.
#[derive(Debug, Clone)]
pub struct Program {
    instructions: Vec<Instruction>,
}

impl Program {
    /// Validate and install `instructions` as a filter program. Rejects
    /// empty programs, jump targets out of range, and programs that don't
    /// terminate with a `Ret*` instruction.
    pub fn new(instructions: Vec<Instruction>) -> Result<Self> {
        if instructions.is_empty() {
            return Err(RingtapError::invalid_filter("program is empty"));
        }
        let len = instructions.len();
        for (i, insn) in instructions.iter().enumerate() {
            let (jt, jf) = match insn {
                Instruction::JmpEq { jt, jf, .. }
                | Instruction::JmpGt { jt, jf, .. }
                | Instruction::JmpSet { jt, jf, .. } => (*jt as usize, *jf as usize),
                Instruction::Jmp(offset) => {
                    if i + 1 + *offset as usize >= len {
                        return Err(RingtapError::invalid_filter("jump target out of range"));
                    }
                    continue;
                }
                _ => continue,
            };
            if i + 1 + jt >= len || i + 1 + jf >= len {
                return Err(RingtapError::invalid_filter("jump target out of range"));
            }
        }
        match instructions.last() {
            Some(Instruction::RetK(_)) | Some(Instruction::RetA) => {}
            _ => {
                return Err(RingtapError::invalid_filter(
                    "program must terminate with a return instruction",
                ))
            }
        }
        Ok(Self { instructions })
    }

    fn resolve(operand: Operand, x: u32) -> u32 {
        match operand {
            Operand::Imm(k) => k,
            Operand::X => x,
        }
    }

    /// Run the program over `packet`, returning the accept/reject result.
    /// A result of `0` means the frame should be dropped.
    pub fn run(&self, packet: &[u8]) -> u32 {
        let mut a: u32 = 0;
        let mut x: u32 = 0;
        let mut pc = 0usize;

        loop {
            let insn = match self.instructions.get(pc) {
                Some(insn) => insn,
                None => return 0,
            };
            match *insn {
                Instruction::LdAbsB(offset) => {
                    a = read_u8(packet, offset as usize);
                }
                Instruction::LdAbsH(offset) => {
                    a = read_u16(packet, offset as usize);
                }
                Instruction::LdAbsW(offset) => {
                    a = read_u32(packet, offset as usize);
                }
                Instruction::LdImm(k) => a = k,
                Instruction::LdxImm(k) => x = k,
                Instruction::Add(op) => a = a.wrapping_add(Self::resolve(op, x)),
                Instruction::And(op) => a &= Self::resolve(op, x),
                Instruction::Or(op) => a |= Self::resolve(op, x),
                Instruction::Xor(op) => a ^= Self::resolve(op, x),
                Instruction::Lsh(op) => a = a.wrapping_shl(Self::resolve(op, x)),
                Instruction::Rsh(op) => a = a.wrapping_shr(Self::resolve(op, x)),
                Instruction::JmpEq { k, jt, jf } => {
                    pc += 1 + if a == k { jt as usize } else { jf as usize };
                    continue;
                }
                Instruction::JmpGt { k, jt, jf } => {
                    pc += 1 + if a > k { jt as usize } else { jf as usize };
                    continue;
                }
                Instruction::JmpSet { k, jt, jf } => {
                    pc += 1 + if a & k != 0 { jt as usize } else { jf as usize };
                    continue;
                }
                Instruction::Jmp(offset) => {
                    pc += 1 + offset as usize;
                    continue;
                }
                Instruction::RetK(k) => return k,
                Instruction::RetA => return a,
            }
            pc += 1;
        }
    }
}

fn read_u8(packet: &[u8], offset: usize) -> u32 {
    packet.get(offset).copied().unwrap_or(0) as u32
}

fn read_u16(packet: &[u8], offset: usize) -> u32 {
    if offset + 2 > packet.len() {
        return 0;
    }
    u16::from_be_bytes([packet[offset], packet[offset + 1]]) as u32
}

fn read_u32(packet: &[u8], offset: usize) -> u32 {
    if offset + 4 > packet.len() {
        return 0;
    }
    u32::from_be_bytes([
        packet[offset],
        packet[offset + 1],
        packet[offset + 2],
        packet[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_program_rejected() {
        assert!(Program::new(vec![]).is_err());
    }

    #[test]
    fn test_program_without_return_rejected() {
        let result = Program::new(vec![Instruction::LdImm(1)]);
        assert!(result.is_err());
    }

    #[test]
    fn test_jump_out_of_range_rejected() {
        let result = Program::new(vec![
            Instruction::JmpEq { k: 0, jt: 10, jf: 0 },
            Instruction::RetK(1),
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_accept_ethertype_ipv4() {
        let program = Program::new(vec![
            Instruction::LdAbsH(12),
            Instruction::JmpEq { k: 0x0800, jt: 0, jf: 1 },
            Instruction::RetK(0xFFFF),
            Instruction::RetK(0),
        ])
        .unwrap();
        let mut frame = vec![0u8; 14];
        frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
        assert_eq!(program.run(&frame), 0xFFFF);

        frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());
        assert_eq!(program.run(&frame), 0);
    }
}
