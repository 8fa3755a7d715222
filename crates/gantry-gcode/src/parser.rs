//! The per-line pipeline: tokenize, collect, resolve groups, validate.

use crate::{
    config::ParserConfig,
    lexer::{Comment, TokenKind, lex},
    modal::{Code, GroupFlags, LineCommand},
    params::Parameters,
    state::{FeedMode, ModalState, ParserState, Units},
    status::Status,
    validate,
    words::{LineWords, WordFlags},
};
use std::fmt;

/// A word the built-in tables rejected, offered to extensions.
#[derive(Debug)]
pub struct WordEvent<'a> {
    pub letter: char,
    pub value: f64,
    /// Present for `G` and `M` words.
    pub code: Option<Code>,
    pub modes: &'a mut ModalState,
    pub words: &'a mut LineWords,
    pub command: &'a mut LineCommand,
}

/// Hooks into line parsing for machine-specific codes.
pub trait Extensions {
    /// A character that cannot start a word. Returns `true` when handled.
    fn parse_token(&mut self, ch: char) -> bool {
        let _ = ch;
        false
    }

    /// Called for unsupported codes and unused words. `None` leaves the
    /// original error in place.
    fn parse_word(&mut self, event: &mut WordEvent<'_>) -> Option<Result<(), Status>> {
        let _ = event;
        None
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoExtensions;

impl Extensions for NoExtensions {}

impl<E: Extensions + ?Sized> Extensions for &mut E {
    fn parse_token(&mut self, ch: char) -> bool {
        (**self).parse_token(ch)
    }

    fn parse_word(&mut self, event: &mut WordEvent<'_>) -> Option<Result<(), Status>> {
        (**self).parse_word(event)
    }
}

/// A fully validated line.
#[derive(Debug, Clone)]
pub struct Block {
    /// Parser state after this line. Feed, speed and tool words are
    /// already absorbed.
    pub state: ParserState,
    pub words: LineWords,
    pub command: LineCommand,
    pub comments: Vec<Comment>,
}

impl Block {
    /// A line with nothing to execute, such as a blank or comment line.
    pub fn is_empty(&self) -> bool {
        self.command == LineCommand::default() && self.words.flags.is_empty()
    }

    /// `(MSG,...)` texts in line order.
    pub fn messages(&self) -> impl Iterator<Item = &str> {
        self.comments
            .iter()
            .filter(|comment| comment.message)
            .map(|comment| comment.text.as_str())
    }

    pub fn line_number(&self) -> Option<u32> {
        self.words.n
    }

    fn absorb_words(&mut self) {
        let state = &mut self.state;
        if self.words.has(WordFlags::F) {
            state.feed = self.words.f;
            if state.modes.units == Units::Inches && state.modes.feed_mode != FeedMode::InverseTime {
                state.feed *= Units::MM_PER_INCH;
            }
        }
        if self.words.has(WordFlags::S) {
            state.spindle_speed = self.words.s.trunc();
        }
        if self.words.has(WordFlags::T) {
            state.tool = self.words.t;
        }
        if self.command.groups.contains(GroupFlags::TOOL_CHANGE) {
            state.active_tool = state.tool;
        }
    }
}

/// Parses single lines against a committed [`ParserState`].
pub struct LineParser<'a, E = NoExtensions> {
    pub config: &'a ParserConfig,
    /// Source for `#n` reads. Defaults to the committed parser state.
    pub params: Option<&'a dyn Parameters>,
    pub extensions: E,
    /// `$J=` lines: restricted words, motion forced to G1.
    pub jog: bool,
}

impl<'a> LineParser<'a> {
    pub fn new(config: &'a ParserConfig) -> Self {
        Self {
            config,
            params: None,
            extensions: NoExtensions,
            jog: false,
        }
    }
}

impl<'a, E: Extensions> LineParser<'a, E> {
    pub fn with_extensions<X: Extensions>(self, extensions: X) -> LineParser<'a, X> {
        LineParser {
            config: self.config,
            params: self.params,
            extensions,
            jog: self.jog,
        }
    }

    pub fn with_params(mut self, params: &'a dyn Parameters) -> Self {
        self.params = Some(params);
        self
    }

    /// Parses and validates the first line of `input`.
    ///
    /// `state` is not modified; the returned block carries the state the
    /// line leaves behind.
    pub fn parse(&mut self, input: &str, state: &ParserState) -> Result<Block, Status> {
        let config = self.config;
        let params: &dyn Parameters = match self.params {
            Some(params) => params,
            None => state,
        };

        let mut next = state.clone();
        let mut words = LineWords::default();
        let mut command = LineCommand::default();
        let mut comments = Vec::new();
        let mut word_count = 0usize;

        for token in lex(input, config, params) {
            let token = token?;
            let (letter, value) = match token.kind {
                TokenKind::Newline => break,
                TokenKind::Comment(comment) => {
                    comments.push(comment);
                    continue;
                }
                TokenKind::Other(ch) => {
                    if self.extensions.parse_token(ch) {
                        continue;
                    }
                    return Err(Status::ExpectedCommandLetter);
                }
                TokenKind::Assign { index, value } => {
                    let valid = index >= 1.0 && index.fract() == 0.0 && index <= f64::from(u16::MAX);
                    if !valid || !next.set_user_var(index as u16, value) {
                        return Err(Status::ValueNotInteger);
                    }
                    word_count += 1;
                    continue;
                }
                TokenKind::Word { letter, value } => (letter, value),
            };

            let code = matches!(letter, 'G' | 'M').then(|| Code::from_value(value));
            let result = match (letter, code) {
                ('G', Some(Some(code))) => command.g_code(code, &mut next.modes, config),
                ('M', Some(Some(code))) => command.m_code(code, &mut next.modes),
                (_, Some(None)) => Err(Status::UnsupportedCommand),
                ('N', _) if word_count != 0 => Err(Status::InvalidLineNumber),
                ('N', _) => {
                    if value < 0.0 || value.fract() != 0.0 {
                        Err(Status::InvalidLineNumber)
                    } else {
                        words.n = Some(value.min(f64::from(u32::MAX)) as u32);
                        Ok(())
                    }
                }
                _ => words.set(letter, value, config),
            };

            match result {
                Err(err @ (Status::UnsupportedCommand | Status::UnusedWords)) => {
                    let mut event = WordEvent {
                        letter,
                        value,
                        code: code.flatten(),
                        modes: &mut next.modes,
                        words: &mut words,
                        command: &mut command,
                    };
                    self.extensions.parse_word(&mut event).unwrap_or(Err(err))?;
                }
                other => other?,
            }
            word_count += 1;
        }

        validate::resolve_tool_length_word(&mut words, &command, config)?;
        validate::validate(&mut next, &words, &mut command, config, self.jog)?;

        let mut block = Block {
            state: next,
            words,
            command,
            comments,
        };
        block.absorb_words();
        Ok(block)
    }
}

/// Parses one line with no extensions.
pub fn parse_line(input: &str, state: &ParserState, config: &ParserConfig) -> Result<Block, Status> {
    LineParser::new(config).parse(input, state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("line {line}: {status}")]
pub struct ProgramError {
    pub line: usize,
    pub status: Status,
}

/// Parses a whole program, committing each line's state for the next.
/// Stops at the first failing line.
pub fn parse_program(input: &str, config: &ParserConfig) -> Result<Vec<Block>, ProgramError> {
    let mut state = ParserState::new(config);
    let mut blocks = Vec::new();
    for (index, line) in input.lines().enumerate() {
        let line_number = index + 1;
        let block = commit_line(line, &mut state, config).map_err(|status| ProgramError {
            line: line_number,
            status,
        })?;
        blocks.push(block);
    }
    Ok(blocks)
}

/// Parses `line` and, on success, makes its state the committed one.
pub(crate) fn commit_line(
    line: &str,
    state: &mut ParserState,
    config: &ParserConfig,
) -> Result<Block, Status> {
    let mut block = parse_line(line, state, config)?;
    if !block.is_empty() {
        let reasserted = block.command.groups.contains(GroupFlags::STOPPING);
        block.state.carry_stopping(reasserted)?;
    }
    *state = block.state.clone();
    Ok(block)
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{Coolant, Motion, Spindle, Stopping};

    fn parse(line: &str) -> Result<Block, Status> {
        let config = ParserConfig::default();
        parse_line(line, &ParserState::new(&config), &config)
    }

    #[test]
    fn modes_and_words_in_one_line() {
        let block = parse("N10 G0 G91 X1 Y-2 M3 S1000 M8 (go)").unwrap();
        assert_eq!(block.line_number(), Some(10));
        assert_eq!(block.state.modes.motion, Motion::Rapid);
        assert_eq!(block.state.modes.spindle, Spindle::Clockwise);
        assert_eq!(block.state.modes.coolant, Coolant::FLOOD);
        assert_eq!(block.state.spindle_speed, 1000.0);
        assert_eq!(block.words.axes[..2], [1.0, -2.0]);
        assert_eq!(block.comments.len(), 1);
    }

    #[test]
    fn line_number_must_come_first() {
        assert_eq!(parse("G0 N10 X1").unwrap_err(), Status::InvalidLineNumber);
    }

    #[test]
    fn stray_characters_fail_without_a_handler() {
        assert_eq!(parse("G0 X1 %").unwrap_err(), Status::ExpectedCommandLetter);
        assert_eq!(parse("G0 X1 Y1 X2").unwrap_err(), Status::WordRepeated);
        assert_eq!(parse("G0 X.").unwrap_err(), Status::BadNumberFormat);
    }

    #[test]
    fn assignments_apply_to_the_next_line() {
        let config = ParserConfig::default();
        let mut state = ParserState::new(&config);
        let block = commit_line("#1=5 G0 X#1", &mut state, &config).unwrap();
        assert_eq!(block.words.axes[0], 0.0);
        let block = commit_line("G0 X#1", &mut state, &config).unwrap();
        assert_eq!(block.words.axes[0], 5.0);
        assert_eq!(
            commit_line("#0=1", &mut state, &config).unwrap_err(),
            Status::ValueNotInteger
        );
        assert_eq!(
            commit_line("#51=1", &mut state, &config).unwrap_err(),
            Status::ValueNotInteger
        );
    }

    #[test]
    fn inch_feed_is_stored_in_millimeters() {
        let block = parse("G20 G1 X1 F10").unwrap();
        assert!((block.state.feed - 254.0).abs() < 1e-9);
        let block = parse("G20 G93 G1 X1 F10").unwrap();
        assert_eq!(block.state.feed, 10.0);
    }

    #[test]
    fn program_end_blocks_later_lines() {
        let err = parse_program("G0 X1\nM2\n\nG0 X2\n", &ParserConfig::default()).unwrap_err();
        assert_eq!(
            err,
            ProgramError {
                line: 4,
                status: Status::ProgramEnded
            }
        );

        let blocks = parse_program("M0\nG0 X1", &ParserConfig::default()).unwrap();
        assert_eq!(blocks[0].state.modes.stopping, Stopping::Pause);
        assert_eq!(blocks[1].state.modes.stopping, Stopping::Continue);
    }

    struct Laser {
        tokens: Vec<char>,
    }

    impl Extensions for Laser {
        fn parse_token(&mut self, ch: char) -> bool {
            self.tokens.push(ch);
            ch == '@'
        }

        fn parse_word(&mut self, event: &mut WordEvent<'_>) -> Option<Result<(), Status>> {
            match (event.letter, event.code) {
                ('M', Some(Code { number: 100, .. })) => Some(event.command.set_extended(100)),
                ('E', _) => Some(Ok(())),
                _ => None,
            }
        }
    }

    #[test]
    fn extensions_claim_codes_and_tokens() {
        let config = ParserConfig::default();
        let state = ParserState::new(&config);
        let mut laser = Laser { tokens: vec![] };
        let mut parser = LineParser::new(&config).with_extensions(&mut laser);

        let block = parser.parse("M100 @", &state).unwrap();
        assert_eq!(block.command.extended, Some(100));
        assert!(parser.parse("G0 X1 E5", &state).is_ok());
        assert_eq!(
            parser.parse("M101", &state).unwrap_err(),
            Status::UnsupportedCommand
        );
        assert_eq!(
            parser.parse("G0 X1 !", &state).unwrap_err(),
            Status::ExpectedCommandLetter
        );
        drop(parser);
        assert_eq!(laser.tokens, vec!['@', '!']);
    }
}
