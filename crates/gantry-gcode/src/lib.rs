//! RS274NGC tokenizer, expression evaluator and line validator.
//!
//! A line goes through [`lex`], then [`parse_line`] collects its words,
//! resolves modal groups and validates the result against the current
//! [`ParserState`]. Execution of the validated [`Block`] lives in
//! `gantry-core`.

mod config;
mod expr;
mod lexer;
mod modal;
mod params;
mod parser;
mod state;
mod status;
mod validate;
mod words;

pub use config::{AXIS_LETTERS, Axes, MAX_AXES, MAX_COORD_SYSTEMS, ParserConfig};
pub use expr::ExprError;
pub use lexer::{Comment, LexError, Lexer, Token, TokenKind, lex};
pub use modal::{Code, GroupFlags, LineCommand, M10, NonModal};
pub use params::{Parameter, Parameters};
pub use parser::{
    Block, Extensions, LineParser, NoExtensions, ProgramError, WordEvent, parse_line,
    parse_program,
};
pub use state::{
    CannedCycle, Coolant, CutterComp, Distance, FeedMode, ModalState, Motion, PathMode, Plane,
    ParserState, ProbeMode, ReturnMode, Spindle, Stopping, ToolLength, Units, coord_system_code,
};
pub use status::Status;
pub use words::{LineWords, WordFlags};

#[cfg(test)]
mod testing;
#[cfg(test)]
mod tests;
