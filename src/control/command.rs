//! Control line parsing
//!
//! A line is either the exit sentinel, a `^vars` command (which owns the
//! rest of the line), or a comma-separated batch mixing term edits with
//! reserved `^` commands.

use crate::registry::{is_valid_term, TermEdit};

/// Exit sentinel line
pub const EXIT: &str = "^exit";

/// Reserved command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// End the session
    Exit,
    /// Filesystem totals
    Space,
    /// Synchronous reap pass
    Clear,
    /// Bytes stored under the image root
    Idea,
    /// Show the committed TermSet
    Terms,
    /// Wake the downloader without changing terms
    Download,
    /// List or merge runtime variables; holds the argument text
    Vars(String),
    /// Anything else starting with `^`
    Unknown(String),
}

impl Command {
    fn from_name(name: &str) -> Self {
        match name {
            "exit" => Self::Exit,
            "space" => Self::Space,
            "clear" => Self::Clear,
            "idea" => Self::Idea,
            "term" | "terms" => Self::Terms,
            "download" => Self::Download,
            "vars" => Self::Vars(String::new()),
            other => Self::Unknown(format!("^{}", other)),
        }
    }
}

/// One element of a parsed line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Command(Command),
    Edit(TermEdit),
    /// A term that cannot name a directory under the image root
    InvalidTerm(String),
}

/// Parse a whitespace-stripped line
pub fn parse_line(line: &str) -> Vec<Token> {
    let line = line.trim();
    if line == EXIT {
        return vec![Token::Command(Command::Exit)];
    }
    if let Some(rest) = line.strip_prefix("^vars") {
        if rest.is_empty() || rest.starts_with(char::is_whitespace) {
            return vec![Token::Command(Command::Vars(rest.trim().to_string()))];
        }
    }

    line.split(',')
        .filter_map(|token| {
            let token = token.trim();
            match token.strip_prefix('^') {
                Some(name) => Some(Token::Command(Command::from_name(name.trim()))),
                None => TermEdit::parse(token).map(|edit| match edit {
                    TermEdit::Add(term) if !is_valid_term(&term) => Token::InvalidTerm(term),
                    edit => Token::Edit(edit),
                }),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_sentinel() {
        assert_eq!(parse_line("  ^exit \r"), vec![Token::Command(Command::Exit)]);
    }

    #[test]
    fn test_path_like_terms_are_rejected() {
        assert_eq!(
            parse_line("../secret, cats, /etc"),
            vec![
                Token::InvalidTerm("../secret".into()),
                Token::Edit(TermEdit::Add("cats".into())),
                Token::InvalidTerm("/etc".into()),
            ]
        );
        // Removing is always allowed so stale terms can be dropped
        assert_eq!(
            parse_line("-../secret"),
            vec![Token::Edit(TermEdit::Remove("../secret".into()))]
        );
    }

    #[test]
    fn test_mixed_batch() {
        let tokens = parse_line("cats, -dogs, ^space,, x-men ,^bogus");
        assert_eq!(
            tokens,
            vec![
                Token::Edit(TermEdit::Add("cats".into())),
                Token::Edit(TermEdit::Remove("dogs".into())),
                Token::Command(Command::Space),
                Token::Edit(TermEdit::Add("x-men".into())),
                Token::Command(Command::Unknown("^bogus".into())),
            ]
        );
    }

    #[test]
    fn test_vars_owns_line() {
        assert_eq!(
            parse_line("^vars image_download_interval:30, flip_frequency:2"),
            vec![Token::Command(Command::Vars(
                "image_download_interval:30, flip_frequency:2".into()
            ))]
        );
        assert_eq!(parse_line("^vars"), vec![Token::Command(Command::Vars(String::new()))]);
    }

    #[test]
    fn test_vars_prefix_is_not_vars() {
        assert_eq!(
            parse_line("^varsity"),
            vec![Token::Command(Command::Unknown("^varsity".into()))]
        );
    }

    #[test]
    fn test_empty_line() {
        assert!(parse_line("   ").is_empty());
    }
}
