//! Formatting functions: one raw record in, one prompt+completion string out

use crate::error::PackError;
use crate::record::RawRecord;
use anyhow::Result;

/// Pure, deterministic map from a record to the text that gets tokenized
pub trait Formatter {
    /// Render one record
    fn format(&self, record: &RawRecord) -> Result<String>;
}

impl<F> Formatter for F
where
    F: Fn(&RawRecord) -> Result<String>,
{
    fn format(&self, record: &RawRecord) -> Result<String> {
        self(record)
    }
}

fn require<'r>(record: &'r RawRecord, field: &str) -> Result<&'r str> {
    record.get(field).ok_or_else(|| {
        PackError::MissingField {
            field: field.to_string(),
        }
        .into()
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Literal(String),
    Field(String),
}

/// Text template with `{field}` placeholders
///
/// `{{` and `}}` produce literal braces. Every placeholder must be present in
/// the record being formatted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    pieces: Vec<Piece>,
}

impl Template {
    /// Parse a template
    pub fn new(template: &str) -> Result<Self> {
        let mut pieces = Vec::new();
        let mut literal = String::new();
        let mut chars = template.chars().peekable();

        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    literal.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    literal.push('}');
                }
                '{' => {
                    let mut name = String::new();
                    loop {
                        match chars.next() {
                            Some('}') => break,
                            Some('{') | None => {
                                return Err(PackError::InvalidTemplate(format!(
                                    "unclosed placeholder in {:?}",
                                    template
                                ))
                                .into())
                            }
                            Some(ch) => name.push(ch),
                        }
                    }
                    let name = name.trim();
                    if name.is_empty() {
                        return Err(PackError::InvalidTemplate(format!(
                            "empty placeholder in {:?}",
                            template
                        ))
                        .into());
                    }
                    if !literal.is_empty() {
                        pieces.push(Piece::Literal(std::mem::take(&mut literal)));
                    }
                    pieces.push(Piece::Field(name.to_string()));
                }
                '}' => {
                    return Err(PackError::InvalidTemplate(format!(
                        "unmatched '}}' in {:?}",
                        template
                    ))
                    .into())
                }
                c => literal.push(c),
            }
        }
        if !literal.is_empty() {
            pieces.push(Piece::Literal(literal));
        }

        Ok(Self {
            source: template.to_string(),
            pieces,
        })
    }

    /// `Question: {question}\n\nAnswer: {answer}`
    pub fn question_answer() -> Self {
        Self {
            source: "Question: {question}\n\nAnswer: {answer}".to_string(),
            pieces: vec![
                Piece::Literal("Question: ".to_string()),
                Piece::Field("question".to_string()),
                Piece::Literal("\n\nAnswer: ".to_string()),
                Piece::Field("answer".to_string()),
            ],
        }
    }

    /// Template text as written
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Placeholder names in order of appearance
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.pieces.iter().filter_map(|piece| match piece {
            Piece::Field(name) => Some(name.as_str()),
            Piece::Literal(_) => None,
        })
    }
}

impl Formatter for Template {
    fn format(&self, record: &RawRecord) -> Result<String> {
        let mut out = String::new();
        for piece in &self.pieces {
            match piece {
                Piece::Literal(text) => out.push_str(text),
                Piece::Field(name) => out.push_str(require(record, name)?),
            }
        }
        Ok(out)
    }
}

/// Use a single field verbatim
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextField(pub String);

impl TextField {
    /// Format records by reading `field`
    pub fn new(field: impl Into<String>) -> Self {
        Self(field.into())
    }
}

impl Formatter for TextField {
    fn format(&self, record: &RawRecord) -> Result<String> {
        require(record, &self.0).map(str::to_string)
    }
}

/// Instruction-tuning layout over `instruction`, `input` and `output` fields
///
/// The input section is left out when the record has no `input` field or it
/// is blank.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstructionFormatter;

impl Formatter for InstructionFormatter {
    fn format(&self, record: &RawRecord) -> Result<String> {
        let instruction = require(record, "instruction")?;
        let output = require(record, "output")?;

        match record.get("input").map(str::trim).filter(|s| !s.is_empty()) {
            Some(input) => Ok(format!(
                "### Instruction:\n{}\n\n### Input:\n{}\n\n### Response:\n{}",
                instruction, input, output
            )),
            None => Ok(format!(
                "### Instruction:\n{}\n\n### Response:\n{}",
                instruction, output
            )),
        }
    }
}
