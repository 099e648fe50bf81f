//! Command Router - matches free-form command text against registered
//! patterns and dispatches to their handlers.
//!
//! A pattern is a whitespace-separated sequence of literal words and
//! `<name>` placeholders, e.g. `build image <image> at <branch>`. Literals
//! match case-insensitively; a placeholder absorbs one or more words, the
//! shortest run that lets the rest of the pattern match, and a trailing
//! placeholder absorbs everything that is left.
//!
//! Patterns are tried in registration order, except that a pattern without
//! placeholders that matches the text exactly always wins.

use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::conversation::Conversation;
use crate::message::reply_to;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PatternError {
    #[error("pattern is empty")]
    Empty,

    #[error("placeholder without a name in pattern '{0}'")]
    UnnamedPlaceholder(String),

    #[error("placeholder <{name}> appears more than once in pattern '{pattern}'")]
    DuplicatePlaceholder { pattern: String, name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    Literal(String),
    Placeholder(String),
}

/// A compiled command pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandPattern {
    text: String,
    tokens: Vec<Token>,
}

impl CommandPattern {
    pub fn parse(pattern: &str) -> Result<Self, PatternError> {
        let mut tokens = Vec::new();
        let mut names: Vec<&str> = Vec::new();

        for word in pattern.split_whitespace() {
            let Some(name) = word.strip_prefix('<').and_then(|w| w.strip_suffix('>')) else {
                tokens.push(Token::Literal(word.to_lowercase()));
                continue;
            };

            if name.is_empty() {
                return Err(PatternError::UnnamedPlaceholder(pattern.to_string()));
            }
            if names.contains(&name) {
                return Err(PatternError::DuplicatePlaceholder {
                    pattern: pattern.to_string(),
                    name: name.to_string(),
                });
            }
            names.push(name);
            tokens.push(Token::Placeholder(name.to_string()));
        }

        if tokens.is_empty() {
            return Err(PatternError::Empty);
        }

        Ok(Self {
            text: pattern.trim().to_string(),
            tokens,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    /// True if the pattern has no placeholders.
    pub fn is_literal(&self) -> bool {
        self.tokens.iter().all(|t| matches!(t, Token::Literal(_)))
    }

    /// Match the whole of `text`, returning the placeholder values.
    pub fn matches(&self, text: &str) -> Option<Params> {
        self.match_words(text, &split_words(text))
    }

    /// Single left-to-right pass over `words`. An inner placeholder ends
    /// where the literal run after it first occurs, which is the shortest
    /// capture that lets the rest of the pattern match.
    fn match_words(&self, text: &str, words: &[Word<'_>]) -> Option<Params> {
        let mut values = HashMap::new();
        let mut token = 0;
        let mut word = 0;

        while let Some(current) = self.tokens.get(token) {
            match current {
                Token::Literal(literal) => {
                    if !words.get(word).is_some_and(|w| w.text.eq_ignore_ascii_case(literal)) {
                        return None;
                    }
                    word += 1;
                }
                Token::Placeholder(name) => {
                    if word >= words.len() {
                        return None;
                    }
                    let end = self.placeholder_end(token, words, word)?;
                    values.insert(
                        name.clone(),
                        text[words[word].start..words[end - 1].end].to_string(),
                    );
                    word = end;
                }
            }
            token += 1;
        }

        (word == words.len()).then_some(Params(values))
    }

    /// Index of the first word after the placeholder at `token`, which
    /// starts capturing at `word`.
    fn placeholder_end(&self, token: usize, words: &[Word<'_>], word: usize) -> Option<usize> {
        let rest = &self.tokens[token + 1..];
        let anchor_len = rest
            .iter()
            .take_while(|t| matches!(t, Token::Literal(_)))
            .count();
        let anchor = &rest[..anchor_len];

        if rest.is_empty() {
            return Some(words.len());
        }
        if anchor.is_empty() {
            return Some(word + 1);
        }

        let last_start = words.len().checked_sub(anchor.len())?;
        if anchor_len == rest.len() {
            // Closing literals must sit at the very end.
            return (last_start > word && literals_at(anchor, words, last_start))
                .then_some(last_start);
        }
        (word + 1..=last_start).find(|&start| literals_at(anchor, words, start))
    }
}

fn literals_at(literals: &[Token], words: &[Word<'_>], start: usize) -> bool {
    literals.iter().zip(&words[start..]).all(|(token, word)| match token {
        Token::Literal(literal) => word.text.eq_ignore_ascii_case(literal),
        Token::Placeholder(_) => false,
    })
}

impl FromStr for CommandPattern {
    type Err = PatternError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for CommandPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

struct Word<'a> {
    text: &'a str,
    start: usize,
    end: usize,
}

fn split_words(text: &str) -> Vec<Word<'_>> {
    let mut words = Vec::new();
    let mut start = None;

    for (i, c) in text.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                words.push(Word {
                    text: &text[s..i],
                    start: s,
                    end: i,
                });
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        words.push(Word {
            text: &text[s..],
            start: s,
            end: text.len(),
        });
    }
    words
}

/// Placeholder values extracted by one successful match.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Params(HashMap<String, String>);

impl Params {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Value of `name`, or an empty string if the pattern has no such placeholder.
    pub fn string(&self, name: &str) -> &str {
        self.get(name).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<const N: usize> From<[(&str, &str); N]> for Params {
    fn from(pairs: [(&str, &str); N]) -> Self {
        Self(
            pairs
                .into_iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
    }
}

/// Everything a handler gets for one matched command.
pub struct Request {
    pub conversation: Arc<dyn Conversation>,
    pub params: Params,
}

type BoxedHandler = Arc<dyn Fn(Request) -> BoxFuture<'static, ()> + Send + Sync>;

struct Command {
    pattern: CommandPattern,
    handler: BoxedHandler,
}

/// Ordered set of command patterns and their handlers.
#[derive(Default)]
pub struct Router {
    commands: Vec<Command>,
}

impl Router {
    /// Create a router with no handlers registered.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a pattern.
    ///
    /// Earlier registrations take precedence, so register specific patterns
    /// before general ones that could also match.
    pub fn register<F, Fut>(&mut self, pattern: &str, handler: F) -> Result<(), PatternError>
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let pattern = CommandPattern::parse(pattern)?;
        debug!(pattern = %pattern, "Registering command");
        self.commands.push(Command {
            pattern,
            handler: Arc::new(move |request| Box::pin(handler(request))),
        });
        Ok(())
    }

    /// Registered patterns, in registration order.
    pub fn patterns(&self) -> impl Iterator<Item = &CommandPattern> {
        self.commands.iter().map(|c| &c.pattern)
    }

    fn find(&self, text: &str) -> Option<(&Command, Params)> {
        let words = split_words(text);

        let exact = self
            .commands
            .iter()
            .filter(|c| c.pattern.is_literal())
            .find_map(|c| Some((c, c.pattern.match_words(text, &words)?)));

        exact.or_else(|| {
            self.commands
                .iter()
                .find_map(|c| Some((c, c.pattern.match_words(text, &words)?)))
        })
    }

    /// Route a conversation to its handler on a new task.
    ///
    /// Returns `None` without replying if the conversation carries no
    /// command. Otherwise matching and the matched handler, or a help or
    /// unknown-command reply, run on the returned task; the caller need not
    /// wait for it.
    pub fn dispatch(self: &Arc<Self>, conversation: Arc<dyn Conversation>) -> Option<JoinHandle<()>> {
        let text = conversation.command_text();
        if text.is_empty() {
            return None;
        }

        let router = self.clone();
        Some(tokio::spawn(async move {
            if let Some((command, params)) = router.find(&text) {
                debug!(pattern = %command.pattern, user = conversation.user(), "Dispatching command");
                let handler = command.handler.clone();
                handler(Request {
                    conversation,
                    params,
                })
                .await;
            } else if text == "help" {
                router.help(conversation).await;
            } else {
                debug!(text = %text, "Unknown command");
                router.unknown_command(conversation).await;
            }
        }))
    }

    async fn help(&self, conversation: Arc<dyn Conversation>) {
        reply_to(&conversation)
            .text(format!("\n{}", self.command_list()))
            .send()
            .await;
    }

    async fn unknown_command(&self, conversation: Arc<dyn Conversation>) {
        let mut text = String::from("I don't know how to answer that.");
        if !self.commands.is_empty() {
            text.push_str(" I can respond to the following commands:\n\n");
            text.push_str(&self.command_list());
        }
        reply_to(&conversation).error_text(text).send().await;
    }

    fn command_list(&self) -> String {
        self.patterns()
            .map(|pattern| format!("• `{}`\n", pattern))
            .collect()
    }
}
