//! Line console: the operator's way of sending a message.
//!
//! Characters arrive one at a time. The operator types the destination
//! address, then the message kind, then the message text, ending each with
//! a line end (`\r`, `\n` or `\r\n`). Backspace (`\b` or DEL) removes the
//! last buffered character. Numbers are decimal or `0x`-prefixed hex; an
//! empty kind line means [`MessageKind::Default`].

use tracing::debug;

use crate::error::ConsoleError;
use crate::transport::MessageKind;

/// Longest message text that fits a frame after the address and transport
/// prefixes.
pub const MAX_MESSAGE: usize = crate::frame::MAX_PAYLOAD - 4;

/// Which line the console is collecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Address,
    Kind,
    Message,
}

impl Prompt {
    pub fn label(self) -> &'static str {
        match self {
            Prompt::Address => "address",
            Prompt::Kind => "kind",
            Prompt::Message => "message",
        }
    }
}

/// A complete operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleCommand {
    pub address: u8,
    pub kind: MessageKind,
    pub text: Vec<u8>,
}

#[derive(Debug)]
pub struct LineConsole {
    prompt: Prompt,
    line: String,
    address: u8,
    kind: MessageKind,
    after_cr: bool,
}

impl LineConsole {
    pub fn new() -> Self {
        Self {
            prompt: Prompt::Address,
            line: String::new(),
            address: 0,
            kind: MessageKind::Default,
            after_cr: false,
        }
    }

    pub fn prompt(&self) -> Prompt {
        self.prompt
    }

    /// Characters typed on the current line.
    pub fn buffered(&self) -> &str {
        &self.line
    }

    /// Feed one character.
    ///
    /// Returns `Some` when a line end completes a command or when a line is
    /// rejected; on error the console starts over at the address prompt.
    pub fn feed(&mut self, ch: char) -> Option<Result<ConsoleCommand, ConsoleError>> {
        let after_cr = std::mem::replace(&mut self.after_cr, ch == '\r');
        match ch {
            '\n' if after_cr => None,
            '\r' | '\n' => self.end_line(),
            '\u{8}' | '\u{7f}' => {
                self.line.pop();
                None
            }
            _ => {
                if self.prompt == Prompt::Message && self.line.len() + ch.len_utf8() > MAX_MESSAGE {
                    self.reset();
                    return Some(Err(ConsoleError::LineTooLong { max: MAX_MESSAGE }));
                }
                self.line.push(ch);
                None
            }
        }
    }

    /// Feed every character of `input`, collecting the outcomes.
    pub fn feed_str(&mut self, input: &str) -> Vec<Result<ConsoleCommand, ConsoleError>> {
        input.chars().filter_map(|ch| self.feed(ch)).collect()
    }

    /// Abandon the command being typed.
    pub fn reset(&mut self) {
        self.prompt = Prompt::Address;
        self.line.clear();
        self.address = 0;
        self.kind = MessageKind::Default;
    }

    fn end_line(&mut self) -> Option<Result<ConsoleCommand, ConsoleError>> {
        let line = std::mem::take(&mut self.line);
        match self.prompt {
            Prompt::Address => match parse_number(&line) {
                Some(address) => {
                    self.address = address;
                    self.prompt = Prompt::Kind;
                    None
                }
                None => {
                    self.reset();
                    Some(Err(ConsoleError::InvalidAddress(line)))
                }
            },
            Prompt::Kind => {
                let kind = if line.trim().is_empty() {
                    Some(0)
                } else {
                    parse_number(&line)
                };
                match kind {
                    Some(kind) => {
                        self.kind = MessageKind::from(kind);
                        self.prompt = Prompt::Message;
                        None
                    }
                    None => {
                        self.reset();
                        Some(Err(ConsoleError::InvalidKind(line)))
                    }
                }
            }
            Prompt::Message => {
                let command = ConsoleCommand {
                    address: self.address,
                    kind: self.kind,
                    text: line.into_bytes(),
                };
                debug!(address = command.address, kind = %command.kind, "console command complete");
                self.reset();
                Some(Ok(command))
            }
        }
    }
}

impl Default for LineConsole {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse a byte-sized number, decimal or `0x` hex.
pub fn parse_number(input: &str) -> Option<u8> {
    let input = input.trim();
    match input.strip_prefix("0x").or_else(|| input.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16).ok(),
        None => input.parse().ok(),
    }
}
