use crate::{ParserConfig, ParserState, Token, lex, parser::commit_line};
use serde::Serialize;

#[derive(Serialize)]
#[serde(untagged)]
enum Entry {
    Token(Token),
    Error { error: String },
}

/// Token stream as pretty JSON. A failed token shows up as an `error`
/// entry followed by the rest of the input.
pub fn snapshot_tokens_from_str(input: &str) -> String {
    let config = ParserConfig::default();
    let state = ParserState::new(&config);
    let entries: Vec<Entry> = lex(input, &config, &state)
        .map(|token| match token {
            Ok(token) => Entry::Token(token),
            Err(err) => Entry::Error {
                error: err.to_string(),
            },
        })
        .collect();
    serde_json::to_string_pretty(&entries)
        .unwrap_or_else(|err| format!("failed to render JSON: {err}"))
}

/// One entry per input line: the `$G` state after the line commits, or the
/// status it failed with. Failed lines commit nothing.
pub fn snapshot_from_str(input: &str) -> String {
    let config = ParserConfig::default();
    let mut state = ParserState::new(&config);
    input
        .lines()
        .enumerate()
        .map(|(index, line)| match commit_line(line, &mut state, &config) {
            Ok(_) => format!("{}: ok {state}", index + 1),
            Err(status) => format!("{}: error:{} ({status})", index + 1, status.code()),
        })
        .collect::<Vec<_>>()
        .join("\n")
}
