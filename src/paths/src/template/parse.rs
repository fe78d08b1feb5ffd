//! Lexing and parsing of template source into a node tree

use serde_json::{Number, Value};

use super::TemplateError;
use super::funcs;

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Node {
    Text(String),
    Action(Pipeline),
    If {
        cond: Pipeline,
        then: Vec<Node>,
        otherwise: Vec<Node>,
    },
    With {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
    Range {
        pipe: Pipeline,
        body: Vec<Node>,
        otherwise: Vec<Node>,
    },
}

/// Commands joined by `|`; each result is passed as last argument of the next
#[derive(Debug, Clone, PartialEq)]
pub(super) struct Pipeline {
    pub(super) commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Command {
    Call { name: String, args: Vec<Operand> },
    Operand(Operand),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Operand {
    /// `.`
    Dot,
    /// `.a.b`, relative to dot
    Field(Vec<String>),
    /// `$` or `$.a.b`, relative to the execution context
    Root(Vec<String>),
    Literal(Value),
    /// Function name used as an argument, called without arguments
    Call(String),
    /// `(pipeline)` optionally followed by a field chain
    Sub(Box<Pipeline>, Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Dot,
    Field(Vec<String>),
    Variable(String, Vec<String>),
    Ident(String),
    Literal(Value),
    Pipe,
    LeftParen,
    RightParen,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    /// Preceded by whitespace (or first in its action)
    spaced: bool,
    offset: usize,
}

enum Segment {
    Text(String),
    Action { tokens: Vec<Token>, offset: usize },
}

enum Terminator {
    Eof,
    End,
    Else(Vec<Token>, usize),
}

const KEYWORDS: &[&str] = &["if", "else", "end", "with", "range"];

fn parse_error(offset: usize, message: impl Into<String>) -> TemplateError {
    TemplateError::Parse {
        offset,
        message: message.into(),
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_'
}

fn is_ident_char(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

/// Parse template source into its node tree.
pub(super) fn parse(source: &str) -> Result<Vec<Node>, TemplateError> {
    let mut parser = Parser {
        segments: segments(source)?.into_iter(),
    };
    match parser.parse_list()? {
        (nodes, Terminator::Eof) => Ok(nodes),
        (_, Terminator::End) => Err(parse_error(source.len(), "unexpected {{end}}")),
        (_, Terminator::Else(_, offset)) => Err(parse_error(offset, "unexpected {{else}}")),
    }
}

/// Split the source into text and lexed actions, applying trim markers and
/// dropping comments.
fn segments(source: &str) -> Result<Vec<Segment>, TemplateError> {
    let bytes = source.as_bytes();
    let mut segments = Vec::new();
    let mut pos = 0;
    let mut trim_next = false;

    while pos < source.len() {
        let Some(rel) = source[pos..].find("{{") else {
            let mut text = &source[pos..];
            if trim_next {
                text = text.trim_start_matches([' ', '\t', '\r', '\n']);
            }
            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }
            break;
        };

        let start = pos + rel;
        let mut text = &source[pos..start];
        if trim_next {
            text = text.trim_start_matches([' ', '\t', '\r', '\n']);
        }

        let mut inner = start + 2;
        if bytes.get(inner) == Some(&b'-') && bytes.get(inner + 1).copied().is_some_and(is_space) {
            text = text.trim_end_matches([' ', '\t', '\r', '\n']);
            inner += 1;
        }
        if !text.is_empty() {
            segments.push(Segment::Text(text.to_string()));
        }

        let mut cursor = inner;
        while bytes.get(cursor).copied().is_some_and(is_space) {
            cursor += 1;
        }
        if source[cursor..].starts_with("/*") {
            let (end, trim_right) = skip_comment(source, start, cursor + 2)?;
            pos = end;
            trim_next = trim_right;
            continue;
        }

        let (tokens, end, trim_right) = lex_action(source, inner)?;
        segments.push(Segment::Action {
            tokens,
            offset: start,
        });
        pos = end;
        trim_next = trim_right;
    }

    Ok(segments)
}

fn skip_comment(source: &str, start: usize, body: usize) -> Result<(usize, bool), TemplateError> {
    let Some(rel) = source[body..].find("*/") else {
        return Err(parse_error(start, "unclosed comment"));
    };
    let bytes = source.as_bytes();
    let mut pos = body + rel + 2;
    let had_space = bytes.get(pos).copied().is_some_and(is_space);
    while bytes.get(pos).copied().is_some_and(is_space) {
        pos += 1;
    }
    if had_space && source[pos..].starts_with("-}}") {
        Ok((pos + 3, true))
    } else if source[pos..].starts_with("}}") {
        Ok((pos + 2, false))
    } else {
        Err(parse_error(start, "comment ends before closing delimiter"))
    }
}

/// Lex one action starting right after its opening delimiter. Returns the
/// tokens, the offset following the closing delimiter and whether the
/// closing delimiter asks to trim the following text.
fn lex_action(source: &str, start: usize) -> Result<(Vec<Token>, usize, bool), TemplateError> {
    let bytes = source.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = start;
    let mut spaced = true;

    loop {
        let Some(&c) = bytes.get(pos) else {
            return Err(parse_error(start, "unclosed action"));
        };

        if source[pos..].starts_with("}}") {
            return Ok((tokens, pos + 2, false));
        }

        if is_space(c) {
            while bytes.get(pos).copied().is_some_and(is_space) {
                pos += 1;
            }
            if source[pos..].starts_with("-}}") {
                return Ok((tokens, pos + 3, true));
            }
            spaced = true;
            continue;
        }

        let offset = pos;
        let kind = match c {
            b'|' => {
                pos += 1;
                TokenKind::Pipe
            }
            b'(' => {
                pos += 1;
                TokenKind::LeftParen
            }
            b')' => {
                pos += 1;
                TokenKind::RightParen
            }
            b'"' => {
                let (value, end) = lex_quoted(source, pos)?;
                pos = end;
                TokenKind::Literal(Value::String(value))
            }
            b'`' => {
                let Some(rel) = source[pos + 1..].find('`') else {
                    return Err(parse_error(pos, "unterminated raw quoted string"));
                };
                let value = source[pos + 1..pos + 1 + rel].to_string();
                pos += rel + 2;
                TokenKind::Literal(Value::String(value))
            }
            b'.' if bytes.get(pos + 1).copied().is_some_and(is_ident_start) => {
                let (chain, end) = lex_field_chain(source, pos);
                pos = end;
                TokenKind::Field(chain)
            }
            b'.' => {
                pos += 1;
                TokenKind::Dot
            }
            b'$' => {
                let mut end = pos + 1;
                while bytes.get(end).copied().is_some_and(is_ident_char) {
                    end += 1;
                }
                let name = source[pos + 1..end].to_string();
                let (chain, end) = if bytes.get(end) == Some(&b'.')
                    && bytes.get(end + 1).copied().is_some_and(is_ident_start)
                {
                    lex_field_chain(source, end)
                } else {
                    (Vec::new(), end)
                };
                pos = end;
                TokenKind::Variable(name, chain)
            }
            b'-' | b'+' | b'0'..=b'9' => {
                let (number, end) = lex_number(source, pos)?;
                pos = end;
                TokenKind::Literal(Value::Number(number))
            }
            b if is_ident_start(b) => {
                let mut end = pos;
                while bytes.get(end).copied().is_some_and(is_ident_char) {
                    end += 1;
                }
                let ident = source[pos..end].to_string();
                pos = end;
                TokenKind::Ident(ident)
            }
            _ => {
                let ch = source[pos..].chars().next().unwrap_or_default();
                return Err(parse_error(pos, format!("unexpected {ch:?} in action")));
            }
        };

        tokens.push(Token {
            kind,
            spaced,
            offset,
        });
        spaced = false;
    }
}

fn lex_field_chain(source: &str, start: usize) -> (Vec<String>, usize) {
    let bytes = source.as_bytes();
    let mut chain = Vec::new();
    let mut pos = start;
    while bytes.get(pos) == Some(&b'.') && bytes.get(pos + 1).copied().is_some_and(is_ident_start) {
        let mut end = pos + 1;
        while bytes.get(end).copied().is_some_and(is_ident_char) {
            end += 1;
        }
        chain.push(source[pos + 1..end].to_string());
        pos = end;
    }
    (chain, pos)
}

fn lex_quoted(source: &str, start: usize) -> Result<(String, usize), TemplateError> {
    let mut value = String::new();
    let mut chars = source[start + 1..].char_indices();
    while let Some((idx, c)) = chars.next() {
        match c {
            '"' => return Ok((value, start + 1 + idx + 1)),
            '\\' => {
                let Some((_, escaped)) = chars.next() else {
                    break;
                };
                value.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    '0' => '\0',
                    '\\' | '"' | '\'' => escaped,
                    other => {
                        return Err(parse_error(
                            start + 1 + idx,
                            format!("unknown escape sequence \\{other}"),
                        ));
                    }
                });
            }
            '\n' => break,
            c => value.push(c),
        }
    }
    Err(parse_error(start, "unterminated quoted string"))
}

fn lex_number(source: &str, start: usize) -> Result<(Number, usize), TemplateError> {
    let bytes = source.as_bytes();
    let mut end = start;
    if matches!(bytes.get(end), Some(b'-' | b'+')) {
        end += 1;
    }
    let digits_start = end;
    while bytes.get(end).is_some_and(u8::is_ascii_digit) {
        end += 1;
    }
    let mut is_float = false;
    if bytes.get(end) == Some(&b'.') && bytes.get(end + 1).is_some_and(u8::is_ascii_digit) {
        is_float = true;
        end += 1;
        while bytes.get(end).is_some_and(u8::is_ascii_digit) {
            end += 1;
        }
    }
    if matches!(bytes.get(end), Some(b'e' | b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'-' | b'+')) {
            exp += 1;
        }
        if bytes.get(exp).is_some_and(u8::is_ascii_digit) {
            is_float = true;
            end = exp;
            while bytes.get(end).is_some_and(u8::is_ascii_digit) {
                end += 1;
            }
        }
    }
    if end == digits_start {
        return Err(parse_error(start, "bad number syntax"));
    }

    let text = source[start..end].trim_start_matches('+');
    let number = if is_float {
        text.parse::<f64>().ok().and_then(Number::from_f64)
    } else {
        text.parse::<i64>().ok().map(Number::from)
    };
    number
        .map(|number| (number, end))
        .ok_or_else(|| parse_error(start, format!("bad number syntax: {text}")))
}

struct Parser {
    segments: std::vec::IntoIter<Segment>,
}

impl Parser {
    fn parse_list(&mut self) -> Result<(Vec<Node>, Terminator), TemplateError> {
        let mut nodes = Vec::new();
        while let Some(segment) = self.segments.next() {
            let (tokens, offset) = match segment {
                Segment::Text(text) => {
                    nodes.push(Node::Text(text));
                    continue;
                }
                Segment::Action { tokens, offset } => (tokens, offset),
            };

            let keyword = match tokens.first().map(|t| &t.kind) {
                Some(TokenKind::Ident(ident)) if KEYWORDS.contains(&ident.as_str()) => {
                    ident.as_str()
                }
                _ => {
                    nodes.push(Node::Action(parse_pipeline(&tokens, offset)?));
                    continue;
                }
            };

            match keyword {
                "end" => {
                    if tokens.len() > 1 {
                        return Err(parse_error(offset, "unexpected arguments to {{end}}"));
                    }
                    return Ok((nodes, Terminator::End));
                }
                "else" => return Ok((nodes, Terminator::Else(tokens[1..].to_vec(), offset))),
                "if" => nodes.push(self.parse_if(&tokens[1..], offset)?),
                "with" => {
                    let (pipe, body, otherwise) = self.parse_block("with", &tokens[1..], offset)?;
                    nodes.push(Node::With {
                        pipe,
                        body,
                        otherwise,
                    });
                }
                _ => {
                    let (pipe, body, otherwise) = self.parse_block("range", &tokens[1..], offset)?;
                    nodes.push(Node::Range {
                        pipe,
                        body,
                        otherwise,
                    });
                }
            }
        }
        Ok((nodes, Terminator::Eof))
    }

    fn parse_if(&mut self, tokens: &[Token], offset: usize) -> Result<Node, TemplateError> {
        let cond = parse_pipeline(tokens, offset)?;
        let (then, terminator) = self.parse_list()?;
        let otherwise = match terminator {
            Terminator::End => Vec::new(),
            Terminator::Eof => return Err(parse_error(offset, "missing {{end}} for {{if}}")),
            Terminator::Else(rest, _) if rest.is_empty() => self.parse_else_body("if", offset)?,
            Terminator::Else(rest, else_offset) => match rest.first().map(|t| &t.kind) {
                Some(TokenKind::Ident(ident)) if ident == "if" => {
                    vec![self.parse_if(&rest[1..], else_offset)?]
                }
                _ => return Err(parse_error(else_offset, "unexpected arguments to {{else}}")),
            },
        };
        Ok(Node::If {
            cond,
            then,
            otherwise,
        })
    }

    fn parse_block(
        &mut self,
        keyword: &str,
        tokens: &[Token],
        offset: usize,
    ) -> Result<(Pipeline, Vec<Node>, Vec<Node>), TemplateError> {
        let pipe = parse_pipeline(tokens, offset)?;
        let (body, terminator) = self.parse_list()?;
        let otherwise = match terminator {
            Terminator::End => Vec::new(),
            Terminator::Eof => {
                let message = format!("missing {{{{end}}}} for {{{{{keyword}}}}}");
                return Err(parse_error(offset, message));
            }
            Terminator::Else(rest, _) if rest.is_empty() => {
                self.parse_else_body(keyword, offset)?
            }
            Terminator::Else(_, else_offset) => {
                return Err(parse_error(else_offset, "unexpected arguments to {{else}}"));
            }
        };
        Ok((pipe, body, otherwise))
    }

    fn parse_else_body(
        &mut self,
        keyword: &str,
        offset: usize,
    ) -> Result<Vec<Node>, TemplateError> {
        match self.parse_list()? {
            (nodes, Terminator::End) => Ok(nodes),
            (_, Terminator::Else(_, else_offset)) => {
                Err(parse_error(else_offset, "expected {{end}}, found {{else}}"))
            }
            (_, Terminator::Eof) => Err(parse_error(
                offset,
                format!("missing {{{{end}}}} for {{{{{keyword}}}}}"),
            )),
        }
    }
}

fn parse_pipeline(tokens: &[Token], offset: usize) -> Result<Pipeline, TemplateError> {
    if tokens.is_empty() {
        return Err(parse_error(offset, "missing value for command"));
    }

    let mut commands = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;
    for (idx, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => depth = depth.saturating_sub(1),
            TokenKind::Pipe if depth == 0 => {
                commands.push(parse_command(&tokens[start..idx], token.offset)?);
                start = idx + 1;
            }
            _ => {}
        }
    }
    let end_offset = tokens.last().map_or(offset, |t| t.offset);
    commands.push(parse_command(&tokens[start..], end_offset)?);

    Ok(Pipeline { commands })
}

fn parse_command(tokens: &[Token], offset: usize) -> Result<Command, TemplateError> {
    if tokens.is_empty() {
        return Err(parse_error(offset, "missing value for command"));
    }

    let mut operands = Vec::new();
    let mut idx = 0;
    while idx < tokens.len() {
        let (operand, next) = parse_operand(tokens, idx)?;
        operands.push(operand);
        idx = next;
    }

    let mut operands = operands.into_iter();
    match operands.next() {
        Some(Operand::Call(name)) => Ok(Command::Call {
            name,
            args: operands.collect(),
        }),
        Some(operand) if operands.len() == 0 => Ok(Command::Operand(operand)),
        _ => Err(parse_error(
            tokens[0].offset,
            "can't give argument to non-function",
        )),
    }
}

fn parse_operand(tokens: &[Token], idx: usize) -> Result<(Operand, usize), TemplateError> {
    let token = &tokens[idx];
    let operand = match &token.kind {
        TokenKind::Dot => Operand::Dot,
        TokenKind::Field(chain) => Operand::Field(chain.clone()),
        TokenKind::Variable(name, chain) if name.is_empty() => Operand::Root(chain.clone()),
        TokenKind::Variable(name, _) => {
            let message = format!("undefined variable ${name}");
            return Err(parse_error(token.offset, message));
        }
        TokenKind::Literal(value) => Operand::Literal(value.clone()),
        TokenKind::Ident(ident) if ident == "true" => Operand::Literal(Value::Bool(true)),
        TokenKind::Ident(ident) if ident == "false" => Operand::Literal(Value::Bool(false)),
        TokenKind::Ident(ident) if funcs::is_defined(ident) => Operand::Call(ident.clone()),
        TokenKind::Ident(ident) if KEYWORDS.contains(&ident.as_str()) => {
            let message = format!("unexpected keyword {ident:?}");
            return Err(parse_error(token.offset, message));
        }
        TokenKind::Ident(ident) => {
            let message = format!("function {ident:?} not defined");
            return Err(parse_error(token.offset, message));
        }
        TokenKind::LeftParen => return parse_sub_pipeline(tokens, idx),
        TokenKind::RightParen => {
            return Err(parse_error(token.offset, "unexpected right paren"));
        }
        TokenKind::Pipe => return Err(parse_error(token.offset, "unexpected pipe")),
    };
    Ok((operand, idx + 1))
}

fn parse_sub_pipeline(tokens: &[Token], open: usize) -> Result<(Operand, usize), TemplateError> {
    let mut depth = 0usize;
    let mut close = None;
    for (idx, token) in tokens.iter().enumerate().skip(open) {
        match token.kind {
            TokenKind::LeftParen => depth += 1,
            TokenKind::RightParen => {
                depth -= 1;
                if depth == 0 {
                    close = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let Some(close) = close else {
        return Err(parse_error(tokens[open].offset, "unclosed left paren"));
    };

    let inner = parse_pipeline(&tokens[open + 1..close], tokens[open].offset)?;
    match tokens.get(close + 1) {
        Some(Token {
            kind: TokenKind::Field(chain),
            spaced: false,
            ..
        }) => Ok((Operand::Sub(Box::new(inner), chain.clone()), close + 2)),
        _ => Ok((Operand::Sub(Box::new(inner), Vec::new()), close + 1)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field(chain: &[&str]) -> Operand {
        Operand::Field(chain.iter().map(|s| s.to_string()).collect())
    }

    #[test]
    fn test_parse_text_and_field() {
        let nodes = parse("tmpl_1.{{.labels.owner}}").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("tmpl_1.".to_string()),
                Node::Action(Pipeline {
                    commands: vec![Command::Operand(field(&["labels", "owner"]))]
                }),
            ]
        );
    }

    #[test]
    fn test_parse_pipeline_with_function() {
        let nodes = parse("{{ .shared | escape }}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Action(Pipeline {
                commands: vec![
                    Command::Operand(field(&["shared"])),
                    Command::Call {
                        name: "escape".to_string(),
                        args: vec![]
                    },
                ]
            })]
        );
    }

    #[test]
    fn test_parse_call_with_literals() {
        let nodes = parse(r#"{{ replace .labels.x " " "_" }}"#).unwrap();
        let Node::Action(pipe) = &nodes[0] else {
            panic!("expected action");
        };
        assert_eq!(
            pipe.commands[0],
            Command::Call {
                name: "replace".to_string(),
                args: vec![
                    field(&["labels", "x"]),
                    Operand::Literal(Value::String(" ".to_string())),
                    Operand::Literal(Value::String("_".to_string())),
                ]
            }
        );
    }

    #[test]
    fn test_parse_parenthesized_with_raw_string() {
        let nodes = parse("{{ index ( split . `:` ) 0 }}").unwrap();
        let Node::Action(pipe) = &nodes[0] else {
            panic!("expected action");
        };
        let Command::Call { name, args } = &pipe.commands[0] else {
            panic!("expected call");
        };
        assert_eq!(name, "index");
        let arg = &args[0];
        assert!(matches!(arg, Operand::Sub(_, chain) if chain.is_empty()));
        assert_eq!(args[1], Operand::Literal(Value::Number(0.into())));
    }

    #[test]
    fn test_parse_sub_pipeline_field_chain() {
        let nodes = parse("{{ (index . 0).name }}").unwrap();
        let Node::Action(pipe) = &nodes[0] else {
            panic!("expected action");
        };
        assert!(matches!(
            &pipe.commands[0],
            Command::Operand(Operand::Sub(_, chain)) if chain == &vec!["name".to_string()]
        ));
    }

    #[test]
    fn test_parse_if_else_if_chain() {
        let nodes = parse("{{if .a}}A{{else if .b}}B{{else}}C{{end}}").unwrap();
        let Node::If { then, otherwise, .. } = &nodes[0] else {
            panic!("expected if");
        };
        assert_eq!(then, &vec![Node::Text("A".to_string())]);
        let Node::If {
            then: inner_then,
            otherwise: inner_else,
            ..
        } = &otherwise[0]
        else {
            panic!("expected nested if");
        };
        assert_eq!(inner_then, &vec![Node::Text("B".to_string())]);
        assert_eq!(inner_else, &vec![Node::Text("C".to_string())]);
    }

    #[test]
    fn test_trim_markers_and_comments() {
        let nodes = parse("a  {{- /* note */ -}}  b {{- .x }}\n").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("a".to_string()),
                Node::Text("b".to_string()),
                Node::Action(Pipeline {
                    commands: vec![Command::Operand(field(&["x"]))]
                }),
                Node::Text("\n".to_string()),
            ]
        );
    }

    #[test]
    fn test_negative_number_is_not_trim_marker() {
        let nodes = parse("{{-3}}").unwrap();
        assert_eq!(
            nodes,
            vec![Node::Action(Pipeline {
                commands: vec![Command::Operand(Operand::Literal(Value::Number(
                    (-3).into()
                )))]
            })]
        );
    }

    #[test]
    fn test_closing_delimiter_inside_string() {
        let nodes = parse(r#"{{ replace . "}}" "x" }}"#).unwrap();
        assert_eq!(nodes.len(), 1);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse("{{ .a").is_err());
        assert!(parse("{{ unknownFunc .a }}").is_err());
        assert!(parse("{{ }}").is_err());
        assert!(parse("{{ .a .b }}").is_err());
        assert!(parse("{{ if .a }}x").is_err());
        assert!(parse("x{{ end }}").is_err());
        assert!(parse("{{ $x }}").is_err());
        assert!(parse(r#"{{ "unterminated }}"#).is_err());
        assert!(parse("{{ (split . \",\" }}").is_err());
        assert!(parse("{{ .a | | escape }}").is_err());
    }

    #[test]
    fn test_parse_error_reports_offset() {
        let err = parse("abc{{ nope }}").unwrap_err();
        assert!(matches!(err, TemplateError::Parse { offset: 6, .. }));
    }
}
