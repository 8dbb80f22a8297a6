//! Parser untuk format schema tekstual
//!
//! ```text
//! interface toplevel (version = 3) {
//!     request set_fullscreen (since = 2) {
//!         output: id(output),
//!     }
//!     event closed { }
//! }
//! ```
//!
//! Tokenizer sederhana + recursive descent. Opcode = urutan deklarasi.

use crate::error::SchemaError;

use super::model::{
    Direction, FieldType, InterfaceDef, MessageDef, NewIdVersion, ObjectType, PodKind,
    ANY_INTERFACE, DEFAULT_FIXED_BITS,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Ident(String),
    Number(u64),
    Punct(char),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    tok: Tok,
    line: usize,
    column: usize,
}

fn tokenize(src: &str) -> Result<Vec<Token>, SchemaError> {
    let mut tokens = Vec::new();
    let mut chars = src.chars().peekable();
    let mut line = 1;
    let mut column = 1;

    while let Some(&c) = chars.peek() {
        let (start_line, start_col) = (line, column);
        if c == '\n' {
            chars.next();
            line += 1;
            column = 1;
            continue;
        }
        if c.is_whitespace() {
            chars.next();
            column += 1;
            continue;
        }
        if c == '#' || c == '/' {
            chars.next();
            column += 1;
            if c == '/' && chars.peek() != Some(&'/') {
                return Err(parse_err(start_line, start_col, "unexpected `/`"));
            }
            while let Some(&n) = chars.peek() {
                if n == '\n' {
                    break;
                }
                chars.next();
                column += 1;
            }
            continue;
        }
        if c.is_ascii_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&n) = chars.peek() {
                if n.is_ascii_alphanumeric() || n == '_' {
                    ident.push(n);
                    chars.next();
                    column += 1;
                } else {
                    break;
                }
            }
            tokens.push(Token {
                tok: Tok::Ident(ident),
                line: start_line,
                column: start_col,
            });
            continue;
        }
        if c.is_ascii_digit() {
            let mut value: u64 = 0;
            while let Some(&n) = chars.peek() {
                let Some(d) = n.to_digit(10) else { break };
                value = value
                    .checked_mul(10)
                    .and_then(|v| v.checked_add(d as u64))
                    .ok_or_else(|| parse_err(start_line, start_col, "number is too large"))?;
                chars.next();
                column += 1;
            }
            tokens.push(Token {
                tok: Tok::Number(value),
                line: start_line,
                column: start_col,
            });
            continue;
        }
        if matches!(c, '{' | '}' | '(' | ')' | ':' | ',' | '=') {
            chars.next();
            column += 1;
            tokens.push(Token {
                tok: Tok::Punct(c),
                line: start_line,
                column: start_col,
            });
            continue;
        }
        return Err(parse_err(line, column, format!("unexpected character `{}`", c)));
    }

    tokens.push(Token {
        tok: Tok::Eof,
        line,
        column,
    });
    Ok(tokens)
}

fn parse_err(line: usize, column: usize, message: impl Into<String>) -> SchemaError {
    SchemaError::Parse {
        line,
        column,
        message: message.into(),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn bump(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if tok.tok != Tok::Eof {
            self.pos += 1;
        }
        tok
    }

    fn error_here(&self, message: impl Into<String>) -> SchemaError {
        let tok = self.peek();
        parse_err(tok.line, tok.column, message)
    }

    fn is_punct(&self, c: char) -> bool {
        self.peek().tok == Tok::Punct(c)
    }

    fn expect_punct(&mut self, c: char) -> Result<(), SchemaError> {
        if self.is_punct(c) {
            self.bump();
            Ok(())
        } else {
            Err(self.error_here(format!("expected `{}`", c)))
        }
    }

    fn ident(&mut self) -> Result<String, SchemaError> {
        match self.peek().tok.clone() {
            Tok::Ident(s) => {
                self.bump();
                Ok(s)
            }
            _ => Err(self.error_here("expected identifier")),
        }
    }

    fn keyword(&mut self, kw: &str) -> Result<(), SchemaError> {
        match &self.peek().tok {
            Tok::Ident(s) if s == kw => {
                self.bump();
                Ok(())
            }
            _ => Err(self.error_here(format!("expected `{}`", kw))),
        }
    }

    fn number(&mut self) -> Result<u32, SchemaError> {
        match self.peek().tok {
            Tok::Number(n) => {
                let n = u32::try_from(n)
                    .map_err(|_| self.error_here("number does not fit in u32"))?;
                self.bump();
                Ok(n)
            }
            _ => Err(self.error_here("expected number")),
        }
    }

    fn file(&mut self) -> Result<Vec<InterfaceDef>, SchemaError> {
        let mut interfaces = Vec::new();
        while self.peek().tok != Tok::Eof {
            interfaces.push(self.interface()?);
        }
        Ok(interfaces)
    }

    fn interface(&mut self) -> Result<InterfaceDef, SchemaError> {
        self.keyword("interface")?;
        let mut def = InterfaceDef::new(self.ident()?);

        if self.is_punct('(') {
            self.bump();
            self.keyword("version")?;
            self.expect_punct('=')?;
            def.version = Some(self.number()?);
            self.expect_punct(')')?;
        }

        self.expect_punct('{')?;
        while !self.is_punct('}') {
            let direction = match &self.peek().tok {
                Tok::Ident(s) if s == "request" => Direction::Request,
                Tok::Ident(s) if s == "event" => Direction::Event,
                _ => return Err(self.error_here("expected `request` or `event`")),
            };
            self.bump();
            let count = match direction {
                Direction::Request => def.requests.len(),
                Direction::Event => def.events.len(),
            };
            let opcode = u16::try_from(count).map_err(|_| self.error_here("too many messages"))?;
            let msg = self.message(direction, opcode)?;
            match direction {
                Direction::Request => def.requests.push(msg),
                Direction::Event => def.events.push(msg),
            }
        }
        self.expect_punct('}')?;
        Ok(def)
    }

    fn message(&mut self, direction: Direction, opcode: u16) -> Result<MessageDef, SchemaError> {
        let mut msg = MessageDef::new(self.ident()?, direction, opcode);

        if self.is_punct('(') {
            self.bump();
            loop {
                let attr = self.ident()?;
                match attr.as_str() {
                    "since" => {
                        self.expect_punct('=')?;
                        msg.since = self.number()?;
                    }
                    "destructor" => msg.destructor = true,
                    other => {
                        return Err(
                            self.error_here(format!("unknown message attribute `{}`", other))
                        )
                    }
                }
                if self.is_punct(',') {
                    self.bump();
                    continue;
                }
                self.expect_punct(')')?;
                break;
            }
        }

        self.expect_punct('{')?;
        while !self.is_punct('}') {
            let name = self.ident()?;
            self.expect_punct(':')?;
            let ty = self.field_type()?;
            msg.fields.push(super::model::Field::new(name, ty));
            if self.is_punct(',') {
                self.bump();
            }
        }
        self.expect_punct('}')?;
        Ok(msg)
    }

    fn field_type(&mut self) -> Result<FieldType, SchemaError> {
        let (line, column) = (self.peek().line, self.peek().column);
        let base = self.ident()?;
        let mut ty = match base.as_str() {
            "i32" => FieldType::Int,
            "u32" => FieldType::Uint,
            "fixed" => {
                let mut frac_bits = DEFAULT_FIXED_BITS;
                // `fixed(16)` vs attribute list `fixed (nullable)`
                if self.is_punct('(') && matches!(self.tokens[self.pos + 1].tok, Tok::Number(_)) {
                    self.bump();
                    let bits = self.number()?;
                    frac_bits = u8::try_from(bits).unwrap_or(u8::MAX);
                    self.expect_punct(')')?;
                }
                FieldType::Fixed { frac_bits }
            }
            "str" => FieldType::Str { nullable: false },
            "pod" => {
                self.expect_punct('(')?;
                let kind = match self.ident()?.as_str() {
                    "u64" => PodKind::U64,
                    "f64" => PodKind::F64,
                    other => {
                        return Err(parse_err(
                            line,
                            column,
                            format!("unsupported pod type `{}`", other),
                        ))
                    }
                };
                self.expect_punct(')')?;
                FieldType::Pod(kind)
            }
            "id" => {
                self.expect_punct('(')?;
                let target = self.ident()?;
                self.expect_punct(')')?;
                let target = if target == ANY_INTERFACE {
                    ObjectType::Any
                } else {
                    ObjectType::Named(target)
                };
                FieldType::Object {
                    target,
                    nullable: false,
                }
            }
            "array" => {
                self.expect_punct('(')?;
                let element = self.ident()?;
                self.expect_punct(')')?;
                FieldType::Array { element }
            }
            other => return Err(parse_err(line, column, format!("unknown type `{}`", other))),
        };

        if self.is_punct('(') {
            self.bump();
            let mut new = false;
            let mut nullable = false;
            let mut version = NewIdVersion::Inherit;
            loop {
                let attr = self.ident()?;
                match attr.as_str() {
                    "new" => new = true,
                    "nullable" => nullable = true,
                    "version" => {
                        self.expect_punct('=')?;
                        version = NewIdVersion::FromField(self.ident()?);
                    }
                    other => {
                        return Err(self.error_here(format!("unknown field attribute `{}`", other)))
                    }
                }
                if self.is_punct(',') {
                    self.bump();
                    continue;
                }
                self.expect_punct(')')?;
                break;
            }
            ty = apply_attrs(ty, new, nullable, version)
                .map_err(|message| parse_err(line, column, message))?;
        }
        Ok(ty)
    }
}

fn apply_attrs(
    ty: FieldType,
    new: bool,
    nullable: bool,
    version: NewIdVersion,
) -> Result<FieldType, String> {
    if version != NewIdVersion::Inherit && !new {
        return Err("`version =` is only valid on new id fields".into());
    }
    match ty {
        FieldType::Object { target, .. } if new => {
            let target = match target {
                ObjectType::Any => ANY_INTERFACE.to_string(),
                ObjectType::Named(name) => name,
            };
            if nullable {
                return Err("a new id cannot be nullable".into());
            }
            Ok(FieldType::NewId { target, version })
        }
        FieldType::Object { target, .. } => Ok(FieldType::Object { target, nullable }),
        FieldType::Str { .. } if !new => Ok(FieldType::Str { nullable }),
        other if !new && !nullable => Ok(other),
        other => Err(format!("attributes are not valid on `{}`", other.describe())),
    }
}

/// Parse one schema source into interface definitions (unvalidated).
pub fn parse(src: &str) -> Result<Vec<InterfaceDef>, SchemaError> {
    let tokens = tokenize(src)?;
    Parser { tokens, pos: 0 }.file()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Schema;

    const SRC: &str = r#"
        # toplevel management
        interface output {
            event name { name: str, }
        }

        interface toplevel (version = 3) {
            request destroy (destructor) { }
            request set_fullscreen (since = 2) {
                output: id(output) (nullable),
            }
            request set_scale { scale: fixed(16), raw: pod(f64) }
            event state { states: array(u32) }
            event title { title: str (nullable) }
        }

        interface manager {
            request bind {
                version: u32,
                id: id(toplevel) (new, version = version),
            }
        }
    "#;

    #[test]
    fn test_parse_full_grammar() {
        let defs = parse(SRC).unwrap();
        assert_eq!(defs.len(), 3);

        let toplevel = &defs[1];
        assert_eq!(toplevel.version, Some(3));
        assert_eq!(toplevel.requests.len(), 3);
        assert!(toplevel.requests[0].destructor);
        assert_eq!(toplevel.requests[1].since, 2);
        assert_eq!(toplevel.requests[1].opcode, 1);
        assert_eq!(
            toplevel.requests[1].fields[0].ty,
            FieldType::Object {
                target: ObjectType::Named("output".into()),
                nullable: true
            }
        );
        assert_eq!(toplevel.requests[2].fields[0].ty, FieldType::Fixed { frac_bits: 16 });
        assert_eq!(toplevel.requests[2].fields[1].ty, FieldType::Pod(PodKind::F64));
        assert_eq!(toplevel.events[1].fields[0].ty, FieldType::Str { nullable: true });

        let bind = &defs[2].requests[0];
        assert_eq!(
            bind.fields[1].ty,
            FieldType::NewId {
                target: "toplevel".into(),
                version: NewIdVersion::FromField("version".into())
            }
        );

        Schema::new(defs).unwrap();
    }

    #[test]
    fn test_error_position() {
        let err = parse("interface x {\n  request a { f: float }\n}").unwrap_err();
        match err {
            SchemaError::Parse { line, message, .. } => {
                assert_eq!(line, 2);
                assert!(message.contains("float"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_nullable_new_id_rejected() {
        let err = parse("interface x { request a { id: id(x) (new, nullable) } }").unwrap_err();
        assert!(matches!(err, SchemaError::Parse { .. }));
    }

    #[test]
    fn test_missing_brace() {
        assert!(parse("interface x { request a { }").is_err());
    }
}
