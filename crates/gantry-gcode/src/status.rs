use serde::Serialize;
use thiserror::Error;

/// Line-level outcome reported back over the protocol as `error:<code>`.
///
/// The numeric codes are fixed by the Grbl wire dialect; see [`Status::code`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error, Serialize)]
pub enum Status {
    #[error("expected command letter")]
    ExpectedCommandLetter,
    #[error("bad number format")]
    BadNumberFormat,
    #[error("invalid statement")]
    InvalidStatement,
    #[error("negative value")]
    NegativeValue,
    #[error("setting disabled")]
    SettingDisabled,
    #[error("command not allowed while running")]
    IdleError,
    #[error("g-code locked out during alarm or jog")]
    SystemGcLock,
    #[error("line overflow")]
    Overflow,
    #[error("check door")]
    CheckDoor,
    #[error("invalid jog command")]
    InvalidJogCommand,
    #[error("unsupported command")]
    UnsupportedCommand,
    #[error("modal group violation")]
    ModalGroupViolation,
    #[error("undefined feed rate")]
    UndefinedFeedRate,
    #[error("value not integer")]
    ValueNotInteger,
    #[error("axis command conflict")]
    AxisCommandConflict,
    #[error("word repeated")]
    WordRepeated,
    #[error("no axis words")]
    NoAxisWords,
    #[error("invalid line number")]
    InvalidLineNumber,
    #[error("value word missing")]
    ValueWordMissing,
    #[error("unsupported coordinate system")]
    UnsupportedCoordSys,
    #[error("G53 requires G0 or G1")]
    G53InvalidMotionMode,
    #[error("axis words exist")]
    AxisWordsExist,
    #[error("no axis words in plane")]
    NoAxisWordsInPlane,
    #[error("invalid target")]
    InvalidTarget,
    #[error("arc radius error")]
    ArcRadiusError,
    #[error("no offsets in plane")]
    NoOffsetsInPlane,
    #[error("unused words")]
    UnusedWords,
    #[error("bad comment format")]
    BadCommentFormat,
    #[error("invalid tool")]
    InvalidTool,
    #[error("feed rate not set")]
    FeedNotSet,
    #[error("program ended")]
    ProgramEnded,
    #[error("canned cycle missing P")]
    CannedMissingP,
    #[error("canned cycle missing Q")]
    CannedMissingQ,
    #[error("canned cycle requires G94")]
    CannedInvalidFeedMode,
    #[error("canned cycle requires G40")]
    CannedInvalidRadiusComp,
    #[error("spindle stopped")]
    SpindleStopped,
    #[error("tool failure")]
    ToolFailure,
    #[error("invalid plane")]
    InvalidPlane,
    #[error("hard limits disabled")]
    HardLimitsDisabled,
    #[error("jog canceled")]
    JogCanceled,
    #[error("critical failure")]
    CriticalFail,
}

impl Status {
    pub const fn code(self) -> u8 {
        match self {
            Status::ExpectedCommandLetter => 1,
            Status::BadNumberFormat => 2,
            Status::InvalidStatement => 3,
            Status::NegativeValue => 4,
            Status::SettingDisabled => 5,
            Status::IdleError => 8,
            Status::SystemGcLock => 9,
            Status::Overflow => 11,
            Status::CheckDoor => 13,
            Status::InvalidJogCommand => 16,
            Status::UnsupportedCommand => 20,
            Status::ModalGroupViolation => 21,
            Status::UndefinedFeedRate => 22,
            Status::ValueNotInteger => 23,
            Status::AxisCommandConflict => 24,
            Status::WordRepeated => 25,
            Status::NoAxisWords => 26,
            Status::InvalidLineNumber => 27,
            Status::ValueWordMissing => 28,
            Status::UnsupportedCoordSys => 29,
            Status::G53InvalidMotionMode => 30,
            Status::AxisWordsExist => 31,
            Status::NoAxisWordsInPlane => 32,
            Status::InvalidTarget => 33,
            Status::ArcRadiusError => 34,
            Status::NoOffsetsInPlane => 35,
            Status::UnusedWords => 36,
            Status::BadCommentFormat => 39,
            Status::InvalidTool => 40,
            Status::FeedNotSet => 41,
            Status::ProgramEnded => 44,
            Status::CannedMissingP => 46,
            Status::CannedMissingQ => 47,
            Status::CannedInvalidFeedMode => 48,
            Status::CannedInvalidRadiusComp => 49,
            Status::SpindleStopped => 50,
            Status::ToolFailure => 55,
            Status::InvalidPlane => 56,
            Status::HardLimitsDisabled => 57,
            Status::JogCanceled => 59,
            Status::CriticalFail => 255,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_match_wire_dialect() {
        assert_eq!(Status::ExpectedCommandLetter.code(), 1);
        assert_eq!(Status::ModalGroupViolation.code(), 21);
        assert_eq!(Status::UnusedWords.code(), 36);
        assert_eq!(Status::ProgramEnded.code(), 44);
        assert_eq!(Status::CriticalFail.code(), 255);
    }
}
