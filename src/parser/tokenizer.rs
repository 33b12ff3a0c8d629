//! Token stream for the composition parser, built on the `html5ever` tokenizer.
//!
//! Character data is re-encoded on the way out so text tokens can be written
//! back verbatim. `script` and `style` bodies are raw text and stay untouched.

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag as HtmlTag, TagKind, Token as HtmlToken, TokenSink, TokenSinkResult, Tokenizer,
    TokenizerOpts,
};
use html_escape::encode_text;

use crate::domain::Attributes;
use crate::parser::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Lowercased tag name.
    pub name: String,
    pub attrs: Attributes,
    pub self_closing: bool,
}

impl Tag {
    /// Serialize the start tag.
    pub fn render(&self) -> String {
        let mut out = format!("<{}", self.name);
        if !self.attrs.is_empty() {
            out.push(' ');
            out.push_str(&self.attrs.render());
        }
        out.push_str(if self.self_closing { "/>" } else { ">" });
        out
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Markup-safe text; raw for `script` and `style` bodies.
    Text(String),
    StartTag(Tag),
    EndTag(String),
    Comment(String),
    Doctype(String),
}

impl Token {
    /// Serialize the token back to markup.
    pub fn render(&self) -> String {
        match self {
            Token::Text(text) => text.clone(),
            Token::StartTag(tag) => tag.render(),
            Token::EndTag(name) => format!("</{}>", name),
            Token::Comment(text) => format!("<!--{}-->", text),
            Token::Doctype(name) => format!("<!DOCTYPE {}>", name),
        }
    }
}

/// Tokenize a whole document.
pub fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut queue = BufferQueue::default();
    queue.push_back(StrTendril::from_slice(input));

    let mut tokenizer = Tokenizer::new(Collector::default(), TokenizerOpts::default());
    let _ = tokenizer.feed(&mut queue);
    tokenizer.end();

    tokenizer.sink.finish()
}

#[derive(Default)]
struct Collector {
    tokens: Vec<Token>,
    text: String,
    raw_text: bool,
    eof_error: Option<u64>,
    error: Option<ParseError>,
}

impl Collector {
    fn flush_text(&mut self) {
        if !self.text.is_empty() {
            self.tokens.push(Token::Text(std::mem::take(&mut self.text)));
        }
    }

    fn push(&mut self, token: Token) {
        self.flush_text();
        self.tokens.push(token);
    }

    fn push_text(&mut self, text: &str) {
        if self.raw_text {
            self.text.push_str(text);
        } else {
            self.text.push_str(&encode_text(text));
        }
    }

    fn start_tag(&mut self, tag: HtmlTag) -> TokenSinkResult<()> {
        let name = tag.name.to_string();
        let attrs = tag
            .attrs
            .iter()
            .map(|attr| (attr.name.local.to_string(), attr.value.to_string()))
            .collect();

        let raw = match name.as_str() {
            "script" if !tag.self_closing => Some(RawKind::ScriptData),
            "style" if !tag.self_closing => Some(RawKind::Rawtext),
            _ => None,
        };
        self.push(Token::StartTag(Tag {
            name,
            attrs,
            self_closing: tag.self_closing,
        }));

        match raw {
            Some(kind) => {
                self.raw_text = true;
                TokenSinkResult::RawData(kind)
            }
            None => TokenSinkResult::Continue,
        }
    }

    /// An EOF error is followed by the truncated comment when a comment was open.
    fn fail_on_eof(&mut self, comment: bool) {
        if let Some(line) = self.eof_error.take() {
            if self.error.is_none() {
                self.error = Some(if comment {
                    ParseError::UnterminatedComment { line }
                } else {
                    ParseError::UnterminatedTag { line }
                });
            }
        }
    }

    fn finish(mut self) -> Result<Vec<Token>, ParseError> {
        self.fail_on_eof(false);
        self.flush_text();
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.tokens),
        }
    }
}

impl TokenSink for Collector {
    type Handle = ();

    fn process_token(&mut self, token: HtmlToken, line: u64) -> TokenSinkResult<()> {
        let comment = matches!(token, HtmlToken::CommentToken(_));
        self.fail_on_eof(comment);

        match token {
            HtmlToken::CharacterTokens(text) => self.push_text(&text),
            HtmlToken::NullCharacterToken => self.push_text("\u{FFFD}"),
            HtmlToken::TagToken(tag) => match tag.kind {
                TagKind::StartTag => return self.start_tag(tag),
                TagKind::EndTag => {
                    self.raw_text = false;
                    self.push(Token::EndTag(tag.name.to_string()));
                }
            },
            HtmlToken::CommentToken(text) => self.push(Token::Comment(text.to_string())),
            HtmlToken::DoctypeToken(doctype) => {
                let name = doctype.name.map(|n| n.to_string()).unwrap_or_default();
                self.push(Token::Doctype(name));
            }
            HtmlToken::ParseError(message) => {
                if message.contains("EOF") {
                    self.eof_error = Some(line);
                } else {
                    tracing::trace!("Recoverable markup error on line {}: {}", line, message);
                }
            }
            HtmlToken::EOFToken => {}
        }
        TokenSinkResult::Continue
    }
}
