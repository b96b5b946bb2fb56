use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Instruction set of the decompiled IR, one variant per EVM opcode.
#[derive(
    Clone,
    Copy,
    Debug,
    Display,
    EnumIter,
    EnumString,
    Eq,
    Hash,
    IntoStaticStr,
    Ord,
    PartialEq,
    PartialOrd,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "&'static str")]
#[strum(serialize_all = "UPPERCASE", ascii_case_insensitive)]
#[repr(u8)]
pub enum Opcode {
    Stop = 0x00,
    Add = 0x01,
    Mul = 0x02,
    Sub = 0x03,
    Div = 0x04,
    SDiv = 0x05,
    Mod = 0x06,
    SMod = 0x07,
    AddMod = 0x08,
    MulMod = 0x09,
    Exp = 0x0a,
    SignExtend = 0x0b,
    Lt = 0x10,
    Gt = 0x11,
    SLt = 0x12,
    SGt = 0x13,
    Eq = 0x14,
    IsZero = 0x15,
    And = 0x16,
    Or = 0x17,
    Xor = 0x18,
    Not = 0x19,
    Byte = 0x1a,
    Shl = 0x1b,
    Shr = 0x1c,
    Sar = 0x1d,
    #[strum(to_string = "SHA3", serialize = "KECCAK256")]
    Sha3 = 0x20,
    Address = 0x30,
    Balance = 0x31,
    Origin = 0x32,
    Caller = 0x33,
    CallValue = 0x34,
    CallDataLoad = 0x35,
    CallDataSize = 0x36,
    CallDataCopy = 0x37,
    CodeSize = 0x38,
    CodeCopy = 0x39,
    GasPrice = 0x3a,
    ExtCodeSize = 0x3b,
    ExtCodeCopy = 0x3c,
    ReturnDataSize = 0x3d,
    ReturnDataCopy = 0x3e,
    ExtCodeHash = 0x3f,
    BlockHash = 0x40,
    Coinbase = 0x41,
    Timestamp = 0x42,
    Number = 0x43,
    #[strum(to_string = "PREVRANDAO", serialize = "DIFFICULTY")]
    PrevRandao = 0x44,
    GasLimit = 0x45,
    ChainId = 0x46,
    SelfBalance = 0x47,
    BaseFee = 0x48,
    BlobHash = 0x49,
    BlobBaseFee = 0x4a,
    Pop = 0x50,
    MLoad = 0x51,
    MStore = 0x52,
    MStore8 = 0x53,
    SLoad = 0x54,
    SStore = 0x55,
    Jump = 0x56,
    JumpI = 0x57,
    Pc = 0x58,
    MSize = 0x59,
    Gas = 0x5a,
    JumpDest = 0x5b,
    TLoad = 0x5c,
    TStore = 0x5d,
    MCopy = 0x5e,
    Push0 = 0x5f,
    Push1 = 0x60,
    Push2 = 0x61,
    Push3 = 0x62,
    Push4 = 0x63,
    Push5 = 0x64,
    Push6 = 0x65,
    Push7 = 0x66,
    Push8 = 0x67,
    Push9 = 0x68,
    Push10 = 0x69,
    Push11 = 0x6a,
    Push12 = 0x6b,
    Push13 = 0x6c,
    Push14 = 0x6d,
    Push15 = 0x6e,
    Push16 = 0x6f,
    Push17 = 0x70,
    Push18 = 0x71,
    Push19 = 0x72,
    Push20 = 0x73,
    Push21 = 0x74,
    Push22 = 0x75,
    Push23 = 0x76,
    Push24 = 0x77,
    Push25 = 0x78,
    Push26 = 0x79,
    Push27 = 0x7a,
    Push28 = 0x7b,
    Push29 = 0x7c,
    Push30 = 0x7d,
    Push31 = 0x7e,
    Push32 = 0x7f,
    Dup1 = 0x80,
    Dup2 = 0x81,
    Dup3 = 0x82,
    Dup4 = 0x83,
    Dup5 = 0x84,
    Dup6 = 0x85,
    Dup7 = 0x86,
    Dup8 = 0x87,
    Dup9 = 0x88,
    Dup10 = 0x89,
    Dup11 = 0x8a,
    Dup12 = 0x8b,
    Dup13 = 0x8c,
    Dup14 = 0x8d,
    Dup15 = 0x8e,
    Dup16 = 0x8f,
    Swap1 = 0x90,
    Swap2 = 0x91,
    Swap3 = 0x92,
    Swap4 = 0x93,
    Swap5 = 0x94,
    Swap6 = 0x95,
    Swap7 = 0x96,
    Swap8 = 0x97,
    Swap9 = 0x98,
    Swap10 = 0x99,
    Swap11 = 0x9a,
    Swap12 = 0x9b,
    Swap13 = 0x9c,
    Swap14 = 0x9d,
    Swap15 = 0x9e,
    Swap16 = 0x9f,
    Log0 = 0xa0,
    Log1 = 0xa1,
    Log2 = 0xa2,
    Log3 = 0xa3,
    Log4 = 0xa4,
    Create = 0xf0,
    Call = 0xf1,
    CallCode = 0xf2,
    Return = 0xf3,
    DelegateCall = 0xf4,
    Create2 = 0xf5,
    StaticCall = 0xfa,
    Revert = 0xfd,
    Invalid = 0xfe,
    SelfDestruct = 0xff,
}

impl Opcode {
    pub fn byte(self) -> u8 {
        self as u8
    }

    pub fn from_byte(byte: u8) -> Option<Opcode> {
        static TABLE: OnceLock<[Option<Opcode>; 256]> = OnceLock::new();

        TABLE.get_or_init(|| {
            let mut table = [None; 256];
            Opcode::iter().for_each(|op| table[op.byte() as usize] = Some(op));
            table
        })[byte as usize]
    }

    /// Number of immediate bytes of a PUSH instruction.
    pub fn immediate_size(self) -> usize {
        match self.byte() {
            b @ 0x60..=0x7f => (b - 0x5f) as usize,
            _ => 0,
        }
    }

    pub fn is_push(self) -> bool {
        matches!(self.byte(), 0x5f..=0x7f)
    }

    /// Depth n of DUPn.
    pub fn dup_depth(self) -> Option<usize> {
        match self.byte() {
            b @ 0x80..=0x8f => Some((b - 0x7f) as usize),
            _ => None,
        }
    }

    /// Depth n of SWAPn.
    pub fn swap_depth(self) -> Option<usize> {
        match self.byte() {
            b @ 0x90..=0x9f => Some((b - 0x8f) as usize),
            _ => None,
        }
    }

    pub fn log_topics(self) -> Option<usize> {
        match self.byte() {
            b @ 0xa0..=0xa4 => Some((b - 0xa0) as usize),
            _ => None,
        }
    }

    /// Ends the enclosing basic block.
    pub fn is_block_terminator(self) -> bool {
        matches!(
            self,
            Opcode::Stop
                | Opcode::Jump
                | Opcode::JumpI
                | Opcode::Return
                | Opcode::Revert
                | Opcode::Invalid
                | Opcode::SelfDestruct
        )
    }

    /// Static gas cost. Operand dependent surcharges are charged by the semantics.
    pub fn gas(self) -> u64 {
        use Opcode::*;

        match self {
            Stop | Return | Revert | Invalid => 0,
            JumpDest => 1,
            Address | Origin | Caller | CallValue | CallDataSize | CodeSize | GasPrice
            | ReturnDataSize | Coinbase | Timestamp | Number | PrevRandao | GasLimit | ChainId
            | BaseFee | BlobBaseFee | Pop | Pc | MSize | Gas | Push0 => 2,
            Add | Sub | Lt | Gt | SLt | SGt | Eq | IsZero | And | Or | Xor | Not | Byte | Shl
            | Shr | Sar | CallDataLoad | CallDataCopy | CodeCopy | ReturnDataCopy | MLoad
            | MStore | MStore8 | MCopy | BlobHash => 3,
            Mul | Div | SDiv | Mod | SMod | SignExtend | SelfBalance => 5,
            AddMod | MulMod | Jump => 8,
            Exp | JumpI => 10,
            BlockHash => 20,
            Sha3 => 30,
            Balance | ExtCodeSize | ExtCodeCopy | ExtCodeHash | SLoad | SStore | TLoad
            | TStore | Call | CallCode | DelegateCall | StaticCall => 100,
            Log0 | Log1 | Log2 | Log3 | Log4 => 375,
            SelfDestruct => 5000,
            Create | Create2 => 32000,
            _ if self.is_push() || self.dup_depth().is_some() || self.swap_depth().is_some() => 3,
            _ => unreachable!("every opcode has a static gas cost"),
        }
    }
}

impl TryFrom<String> for Opcode {
    type Error = strum::ParseError;

    fn try_from(mnemonic: String) -> Result<Self, Self::Error> {
        mnemonic.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mnemonics_round_trip_through_bytes() {
        Opcode::iter().for_each(|op| {
            assert_eq!(Opcode::from_byte(op.byte()), Some(op));
            assert_eq!(op.to_string().parse::<Opcode>().ok(), Some(op));
        });

        assert_eq!(Opcode::from_byte(0x0c), None);
    }

    #[test]
    fn aliases_and_stack_metadata() {
        assert_eq!("keccak256".parse::<Opcode>().ok(), Some(Opcode::Sha3));
        assert_eq!("DIFFICULTY".parse::<Opcode>().ok(), Some(Opcode::PrevRandao));
        assert_eq!(Opcode::Push32.immediate_size(), 32);
        assert_eq!(Opcode::Dup16.dup_depth(), Some(16));
        assert_eq!(Opcode::Swap1.swap_depth(), Some(1));
        assert_eq!(Opcode::Log4.log_topics(), Some(4));
    }

    #[test]
    fn every_opcode_has_a_gas_cost() {
        Opcode::iter().for_each(|op| {
            let _ = op.gas();
        });
    }
}
