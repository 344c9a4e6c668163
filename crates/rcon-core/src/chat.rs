//! Chat bridge configuration and page splitting.

use serde::{Deserialize, Serialize};

/// Reply some servers give to a chat poll when nothing was said.
pub const DEFAULT_NO_RESPONSE_SENTINEL: &str = "Server received, But no response!!";

/// Longest page emitted to a channel in one message.
pub const DEFAULT_PAGE_LENGTH: usize = 2000;

/// Which remote commands push and pull chat text for a channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatBinding {
    /// Command prefix used to say something on the server (e.g. `say`)
    pub send_command: String,
    /// Command returning chat lines since the previous poll
    pub receive_command: String,
    /// Poll reply meaning "no new chat"
    #[serde(default = "default_sentinel")]
    pub no_response_sentinel: String,
}

fn default_sentinel() -> String {
    DEFAULT_NO_RESPONSE_SENTINEL.to_string()
}

impl ChatBinding {
    pub fn new(send_command: impl Into<String>, receive_command: impl Into<String>) -> Self {
        Self {
            send_command: send_command.into(),
            receive_command: receive_command.into(),
            no_response_sentinel: default_sentinel(),
        }
    }

    #[must_use]
    pub fn with_sentinel(mut self, sentinel: impl Into<String>) -> Self {
        self.no_response_sentinel = sentinel.into();
        self
    }

    /// Returns true if a poll result carries no chat.
    pub fn is_silent(&self, response: &str) -> bool {
        let trimmed = response.trim();
        trimmed.is_empty() || trimmed == self.no_response_sentinel
    }

    /// Builds the remote command that relays `message`.
    pub fn send_line(&self, message: &ChatMessage) -> String {
        format!("{} {}", self.send_command, message.formatted())
    }
}

/// A chat line authored locally in a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub author: String,
    pub text: String,
}

impl ChatMessage {
    pub fn new(author: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            author: author.into(),
            text: text.into(),
        }
    }

    /// `author: text`, with trailing whitespace dropped.
    pub fn formatted(&self) -> String {
        format!("{}: {}", self.author, self.text.trim_end())
    }
}

/// Splits `text` into pages of at most `page_length` characters.
///
/// Pages break after a newline where possible; a single line longer than a
/// page is cut at a character boundary. Empty pages are never produced.
pub fn paginate(text: &str, page_length: usize) -> Vec<String> {
    let page_length = page_length.max(1);
    let mut pages = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for line in text.split_inclusive('\n') {
        let line_len = line.chars().count();

        if current_len + line_len > page_length && !current.is_empty() {
            pages.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if line_len <= page_length {
            current.push_str(line);
            current_len += line_len;
            continue;
        }

        // Oversized line: hard-wrap it.
        for ch in line.chars() {
            if current_len == page_length {
                pages.push(std::mem::take(&mut current));
                current_len = 0;
            }
            current.push(ch);
            current_len += 1;
        }
    }

    if !current.trim().is_empty() {
        pages.push(current);
    }

    pages.retain(|page| !page.trim().is_empty());
    pages
}
