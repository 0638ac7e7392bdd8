//! LDAP-style service filters (RFC 1960 subset used by service registries).
//!
//! Supported: `&`, `|`, `!`, `=`, `~=`, `>=`, `<=`, presence (`attr=*`) and
//! substrings (`attr=ab*cd*`). Attribute names are case-insensitive. Values are
//! compared according to the property type: integers and doubles numerically,
//! booleans by equality, lists when any element matches.

use std::fmt;
use std::str::FromStr;

use crate::error::FilterError;
use crate::registry::properties::{Properties, PropertyValue};

/// Comparison operator of a simple item.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Op {
    Equal,
    Approx,
    GreaterEq,
    LessEq,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Equal => "=",
            Op::Approx => "~=",
            Op::GreaterEq => ">=",
            Op::LessEq => "<=",
        }
    }
}

/// Parsed filter expression.
#[derive(Clone, Debug, PartialEq)]
pub enum Filter {
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
    Compare {
        attr: String,
        op: Op,
        value: String,
    },
    Present(String),
    Substring {
        attr: String,
        initial: Option<String>,
        any: Vec<String>,
        last: Option<String>,
    },
}

impl Filter {
    /// Parses a filter string.
    ///
    /// # Example
    /// ```
    /// use dsvisor::{Filter, Properties};
    ///
    /// let f = Filter::parse("(&(objectClass=Greeter)(lang=en*))").unwrap();
    /// let props = Properties::new()
    ///     .with("objectClass", vec!["Greeter"])
    ///     .with("lang", "en_US");
    /// assert!(f.matches(&props));
    /// ```
    pub fn parse(text: &str) -> Result<Filter, FilterError> {
        let mut parser = Parser {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        };
        parser.skip_ws();
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos != parser.bytes.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Evaluates the filter against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Filter::And(items) => items.iter().all(|f| f.matches(props)),
            Filter::Or(items) => items.iter().any(|f| f.matches(props)),
            Filter::Not(inner) => !inner.matches(props),
            Filter::Present(attr) => props.contains_key(attr),
            Filter::Compare { attr, op, value } => props
                .get(attr)
                .is_some_and(|v| compare(v, *op, value)),
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => props
                .get(attr)
                .is_some_and(|v| substring(v, initial.as_deref(), any, last.as_deref())),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::And(items) => {
                f.write_str("(&")?;
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Filter::Or(items) => {
                f.write_str("(|")?;
                for item in items {
                    write!(f, "{item}")?;
                }
                f.write_str(")")
            }
            Filter::Not(inner) => write!(f, "(!{inner})"),
            Filter::Present(attr) => write!(f, "({attr}=*)"),
            Filter::Compare { attr, op, value } => {
                write!(f, "({attr}{}{})", op.as_str(), escape(value))
            }
            Filter::Substring {
                attr,
                initial,
                any,
                last,
            } => {
                write!(f, "({attr}=")?;
                if let Some(s) = initial {
                    f.write_str(&escape(s))?;
                }
                f.write_str("*")?;
                for s in any {
                    write!(f, "{}*", escape(s))?;
                }
                if let Some(s) = last {
                    f.write_str(&escape(s))?;
                }
                f.write_str(")")
            }
        }
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '(' | ')' | '*' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn compare(value: &PropertyValue, op: Op, operand: &str) -> bool {
    match value {
        PropertyValue::Str(s) => match op {
            Op::Equal => s == operand,
            Op::Approx => normalize(s) == normalize(operand),
            Op::GreaterEq => s.as_str() >= operand,
            Op::LessEq => s.as_str() <= operand,
        },
        PropertyValue::Long(v) => match operand.trim().parse::<i64>() {
            Ok(o) => ordered(v.cmp(&o), op),
            Err(_) => false,
        },
        PropertyValue::Double(v) => match operand.trim().parse::<f64>() {
            Ok(o) => v.partial_cmp(&o).is_some_and(|ord| ordered(ord, op)),
            Err(_) => false,
        },
        PropertyValue::Bool(b) => operand
            .trim()
            .eq_ignore_ascii_case(if *b { "true" } else { "false" }),
        PropertyValue::List(items) => items.iter().any(|item| compare(item, op, operand)),
    }
}

fn ordered(ord: std::cmp::Ordering, op: Op) -> bool {
    use std::cmp::Ordering::*;
    match op {
        Op::Equal | Op::Approx => ord == Equal,
        Op::GreaterEq => ord != Less,
        Op::LessEq => ord != Greater,
    }
}

fn normalize(s: &str) -> String {
    s.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn substring(value: &PropertyValue, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    match value {
        PropertyValue::Str(s) => glob(s, initial, any, last),
        PropertyValue::List(items) => items.iter().any(|i| substring(i, initial, any, last)),
        other => glob(&other.to_string(), initial, any, last),
    }
}

fn glob(s: &str, initial: Option<&str>, any: &[String], last: Option<&str>) -> bool {
    let mut pos = 0;
    if let Some(init) = initial {
        if !s.starts_with(init) {
            return false;
        }
        pos = init.len();
    }
    for part in any {
        match s[pos..].find(part.as_str()) {
            Some(i) => pos += i + part.len(),
            None => return false,
        }
    }
    match last {
        Some(end) => s.len() >= pos + end.len() && s.ends_with(end),
        None => true,
    }
}

struct Parser<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl Parser<'_> {
    fn error(&self, reason: &'static str) -> FilterError {
        FilterError {
            filter: self.text.to_string(),
            offset: self.pos,
            reason,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|b| b.is_ascii_whitespace()) {
            self.pos += 1;
        }
    }

    fn expect(&mut self, b: u8, reason: &'static str) -> Result<(), FilterError> {
        if self.peek() == Some(b) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(reason))
        }
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        self.expect(b'(', "expected '('")?;
        self.skip_ws();
        let filter = match self.peek() {
            Some(b'&') => {
                self.pos += 1;
                Filter::And(self.list()?)
            }
            Some(b'|') => {
                self.pos += 1;
                Filter::Or(self.list()?)
            }
            Some(b'!') => {
                self.pos += 1;
                self.skip_ws();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(b')', "expected ')'")?;
        self.skip_ws();
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut items = Vec::new();
        self.skip_ws();
        while self.peek() == Some(b'(') {
            items.push(self.filter()?);
        }
        if items.is_empty() {
            return Err(self.error("expected at least one operand"));
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b'=' | b'~' | b'<' | b'>' | b'(' | b')') {
                break;
            }
            self.pos += 1;
        }
        let attr = self.text[start..self.pos].trim().to_string();
        if attr.is_empty() {
            return Err(self.error("missing attribute name"));
        }
        let op = match self.peek() {
            Some(b'=') => {
                self.pos += 1;
                Op::Equal
            }
            Some(b'~') => {
                self.pos += 1;
                self.expect(b'=', "expected '=' after '~'")?;
                Op::Approx
            }
            Some(b'>') => {
                self.pos += 1;
                self.expect(b'=', "expected '=' after '>'")?;
                Op::GreaterEq
            }
            Some(b'<') => {
                self.pos += 1;
                self.expect(b'=', "expected '=' after '<'")?;
                Op::LessEq
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let (segments, starred) = self.value()?;
        if op != Op::Equal || !starred {
            let value = segments.concat();
            return Ok(Filter::Compare { attr, op, value });
        }
        if segments.len() == 2 && segments.iter().all(String::is_empty) {
            return Ok(Filter::Present(attr));
        }
        let n = segments.len();
        let initial = Some(segments[0].clone()).filter(|s| !s.is_empty());
        let last = Some(segments[n - 1].clone()).filter(|s| !s.is_empty());
        let any = segments[1..n - 1]
            .iter()
            .filter(|s| !s.is_empty())
            .cloned()
            .collect();
        Ok(Filter::Substring {
            attr,
            initial,
            any,
            last,
        })
    }

    /// Reads a value up to the closing paren, splitting on unescaped `*`.
    fn value(&mut self) -> Result<(Vec<String>, bool), FilterError> {
        let mut segments = Vec::new();
        let mut current: Vec<u8> = Vec::new();
        let mut starred = false;
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(b')') => break,
                Some(b'(') => return Err(self.error("unescaped '(' in value")),
                Some(b'\\') => {
                    self.pos += 1;
                    match self.peek() {
                        Some(b) => {
                            current.push(b);
                            self.pos += 1;
                        }
                        None => return Err(self.error("dangling escape")),
                    }
                }
                Some(b'*') => {
                    starred = true;
                    segments.push(String::from_utf8_lossy(&current).into_owned());
                    current.clear();
                    self.pos += 1;
                }
                Some(b) => {
                    current.push(b);
                    self.pos += 1;
                }
            }
        }
        segments.push(String::from_utf8_lossy(&current).into_owned());
        Ok((segments, starred))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn props() -> Properties {
        Properties::new()
            .with("objectClass", vec!["Greeter", "Named"])
            .with("service.ranking", 10)
            .with("lang", "en_US")
            .with("weight", 1.5)
            .with("enabled", true)
    }

    #[test]
    fn parses_and_matches_composites() {
        let f = Filter::parse("(&(objectClass=Greeter)(|(lang=de)(service.ranking>=5)))").unwrap();
        assert!(f.matches(&props()));
        let f = Filter::parse("(!(objectClass=Named))").unwrap();
        assert!(!f.matches(&props()));
    }

    #[test]
    fn numeric_and_boolean_compare() {
        assert!(Filter::parse("(service.ranking<=10)").unwrap().matches(&props()));
        assert!(!Filter::parse("(service.ranking>=11)").unwrap().matches(&props()));
        assert!(Filter::parse("(weight>=1.25)").unwrap().matches(&props()));
        assert!(Filter::parse("(enabled=TRUE)").unwrap().matches(&props()));
        assert!(!Filter::parse("(service.ranking=abc)").unwrap().matches(&props()));
    }

    #[test]
    fn presence_substring_and_approx() {
        assert_eq!(
            Filter::parse("(lang=*)").unwrap(),
            Filter::Present("lang".into())
        );
        assert!(Filter::parse("(lang=en*)").unwrap().matches(&props()));
        assert!(Filter::parse("(lang=*_*S)").unwrap().matches(&props()));
        assert!(!Filter::parse("(lang=*de*)").unwrap().matches(&props()));
        assert!(Filter::parse("(LANG~=EN_us)").unwrap().matches(&props()));
    }

    #[test]
    fn escapes_round_trip_through_display() {
        let f = Filter::parse(r"(name=a\*b\(c\))").unwrap();
        assert_eq!(
            f,
            Filter::Compare {
                attr: "name".into(),
                op: Op::Equal,
                value: "a*b(c)".into()
            }
        );
        assert_eq!(Filter::parse(&f.to_string()).unwrap(), f);
    }

    #[test]
    fn rejects_malformed_input() {
        for bad in ["", "objectClass=x", "(objectClass=x", "(&)", "(=x)", "(a=b))", "(a>b)"] {
            assert!(Filter::parse(bad).is_err(), "accepted {bad:?}");
        }
    }
}
