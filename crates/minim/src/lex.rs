use std::sync::OnceLock;

use regex::Regex;

/// One lexical token.
///
/// Operators and punctuation get their own variants; everything else is a
/// `Word`, a `Const` (a literal the constant classifier recognised), or a
/// `Link` (a trailing reference to a child block, attached by the block
/// builder rather than the lexer).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tok {
    Word(String),
    Const(String),
    Link(String),
    Doll,
    Comma,
    Dot,
    Sub,
    Or,
    And,
    Not,
    Colon,
    OpenCur,
    CloseCur,
    OpenBr,
    CloseBr,
    OpenPar,
    ClosePar,
    Act,
    PlusPlus,
    MinusMinus,
    Plus,
    RArrow,
    Minus,
    Star,
    FloorDiv,
    Div,
    Caret,
    Percent,
    Less,
    Greater,
    EqEq,
    NotEq,
    LArrow,
    RebindEq,
    Eq,
}

impl Tok {
    #[must_use]
    pub fn word(&self) -> Option<&str> {
        match self {
            Self::Word(w) => Some(w),
            _ => None,
        }
    }

    /// The payload of a `Word` or `Const` token.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Word(s) | Self::Const(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_word(&self, expected: &str) -> bool {
        matches!(self, Self::Word(w) if w == expected)
    }

    /// Whether this token can end a value: the unary rewrite only treats a
    /// following `-`/`not` as binary when the predecessor is one of these.
    #[must_use]
    fn yields_value(&self) -> bool {
        matches!(self, Self::Word(_) | Self::Const(_) | Self::ClosePar)
    }

    /// Whether a binary action should be emitted for this operator, and its
    /// action op string.
    #[must_use]
    pub fn binary_op(&self) -> Option<&'static str> {
        Some(match self {
            Self::Dot => ".",
            Self::Sub => "'",
            Self::And => "and",
            Self::Or => "or",
            Self::Not => "not",
            Self::EqEq => "==",
            Self::NotEq => "!=",
            Self::Less => "<",
            Self::Greater => ">",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Star => "*",
            Self::Div => "/",
            Self::FloorDiv => "//",
            Self::Percent => "%",
            Self::Caret => "^",
            _ => return None,
        })
    }
}

/// The fixed operator table, longest match first. Keyword-like operators
/// carry the surrounding spaces so they never match inside identifiers.
const OPERATORS: &[(&str, Tok)] = &[
    (" and ", Tok::And),
    (" or ", Tok::Or),
    ("not ", Tok::Not),
    ("++", Tok::PlusPlus),
    ("--", Tok::MinusMinus),
    ("->", Tok::RArrow),
    ("//", Tok::FloorDiv),
    ("==", Tok::EqEq),
    ("!=", Tok::NotEq),
    ("<-", Tok::LArrow),
    ("&=", Tok::RebindEq),
    ("$", Tok::Doll),
    (",", Tok::Comma),
    (".", Tok::Dot),
    ("'", Tok::Sub),
    (":", Tok::Colon),
    ("}", Tok::CloseCur),
    ("{", Tok::OpenCur),
    ("]", Tok::CloseBr),
    ("[", Tok::OpenBr),
    (")", Tok::ClosePar),
    ("(", Tok::OpenPar),
    ("!", Tok::Act),
    ("+", Tok::Plus),
    ("-", Tok::Minus),
    ("*", Tok::Star),
    ("/", Tok::Div),
    ("^", Tok::Caret),
    ("%", Tok::Percent),
    ("<", Tok::Less),
    (">", Tok::Greater),
    ("=", Tok::Eq),
];

fn const_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^(true|false|(-?[0-9]+\.[0-9]+)|(-?[0-9]+)|(b\.[0-9]+)|".*")$"#)
            .expect("constant classifier regex is valid")
    })
}

fn int_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new("^-?[0-9]+$").expect("integer regex is valid"))
}

/// Lexes one logical line into tokens, then applies the numeric-dot merge,
/// the field rewrite and the unary rewrite.
#[must_use]
pub fn tokenize(source: &str) -> Vec<Tok> {
    let mut out = Vec::new();
    let mut buffer = String::new();
    let mut rest = source;

    'scan: while !rest.is_empty() {
        for (pat, tok) in OPERATORS {
            if let Some(after) = rest.strip_prefix(pat) {
                flush(&mut buffer, &mut out);
                out.push(tok.clone());
                rest = after;
                continue 'scan;
            }
        }
        let ch = rest.chars().next().expect("rest is non-empty");
        if ch == ' ' {
            flush(&mut buffer, &mut out);
        } else {
            buffer.push(ch);
        }
        rest = &rest[ch.len_utf8()..];
    }
    flush(&mut buffer, &mut out);

    let out = merge_dotted(out);
    let out = dot_to_field(out);
    unary(out)
}

/// Classifies and appends the pending buffer, if any. Joined continuation
/// lines leave embedded newlines in the buffer; trimming strips them.
fn flush(buffer: &mut String, out: &mut Vec<Tok>) {
    let word = buffer.trim();
    if !word.is_empty() {
        if const_regex().is_match(word) {
            out.push(Tok::Const(word.to_owned()));
        } else {
            out.push(Tok::Word(word.to_owned()));
        }
    }
    buffer.clear();
}

/// Collapses `CONST . CONST` into a single decimal constant and `b . CONST`
/// into a byte literal, scanning dot positions right to left so earlier
/// indices stay valid.
fn merge_dotted(mut tokens: Vec<Tok>) -> Vec<Tok> {
    let dots: Vec<usize> = tokens
        .iter()
        .enumerate()
        .filter_map(|(n, t)| (*t == Tok::Dot).then_some(n))
        .collect();
    for &ind in dots.iter().rev() {
        if ind == 0 || ind + 1 >= tokens.len() {
            continue;
        }
        let right_int = matches!(&tokens[ind + 1], Tok::Const(c) if int_regex().is_match(c));
        if !right_int {
            continue;
        }
        let merged = match &tokens[ind - 1] {
            Tok::Const(left) if int_regex().is_match(left) => {
                let Tok::Const(right) = &tokens[ind + 1] else { unreachable!() };
                Some(format!("{left}.{right}"))
            }
            Tok::Word(w) if w == "b" => {
                let Tok::Const(right) = &tokens[ind + 1] else { unreachable!() };
                Some(format!("b.{right}"))
            }
            _ => None,
        };
        if let Some(value) = merged {
            tokens.splice(ind - 1..=ind + 1, [Tok::Const(value)]);
        }
    }
    tokens
}

/// Rewrites `WORD . <WORD|CONST>` into `WORD ' "<name>"` so field access
/// reads as a quoted pair lookup. Dots not followed by a word or constant
/// are left alone; `int.[...]` array headers keep their dot.
fn dot_to_field(mut tokens: Vec<Tok>) -> Vec<Tok> {
    let mut n = 1;
    while n + 1 < tokens.len() {
        if tokens[n] == Tok::Dot && matches!(tokens[n - 1], Tok::Word(_)) {
            if let Some(name) = tokens[n + 1].text().map(ToOwned::to_owned) {
                tokens[n] = Tok::Sub;
                tokens[n + 1] = Tok::Const(format!("\"{name}\""));
            }
        }
        n += 1;
    }
    tokens
}

/// Turns unary `-`/`not` into the binary form by inserting a parenthesised
/// zero prefix: `a = -x` becomes `a = (0 - x)`.
fn unary(mut tokens: Vec<Tok>) -> Vec<Tok> {
    let mut n = 0;
    while n < tokens.len() {
        let is_unary_op = matches!(tokens[n], Tok::Minus | Tok::Not);
        let preceded_by_value = n > 0 && tokens[n - 1].yields_value();
        if is_unary_op && !preceded_by_value && n + 1 < tokens.len() {
            let op = tokens[n].clone();
            let operand = tokens[n + 1].clone();
            tokens.splice(
                n..=n + 1,
                [
                    Tok::OpenPar,
                    Tok::Const("0".to_owned()),
                    op,
                    operand,
                    Tok::ClosePar,
                ],
            );
            n = 0;
            continue;
        }
        n += 1;
    }
    tokens
}
