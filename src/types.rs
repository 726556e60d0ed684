//! Core types for the instrumented cache.

use crate::error::{CacheError, Result};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Suffix of the list holding rendered call arguments.
pub const INPUTS_SUFFIX: &str = ":inputs";

/// Suffix of the list holding rendered call results.
pub const OUTPUTS_SUFFIX: &str = ":outputs";

/// A scalar value the cache accepts.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Text(String),
    Bytes(Vec<u8>),
    Int(i64),
    Float(f64),
}

impl Value {
    /// Encode the value the way it is sent to the store.
    ///
    /// Numbers travel as their decimal text, like a Redis client would
    /// send them, so `INCR` and integer coercion work on stored ints.
    pub fn to_store_bytes(&self) -> Vec<u8> {
        match self {
            Value::Text(s) => s.as_bytes().to_vec(),
            Value::Bytes(b) => b.clone(),
            Value::Int(i) => i.to_string().into_bytes(),
            Value::Float(f) => format_float(*f).into_bytes(),
        }
    }

    /// Convert a dynamically typed JSON value, rejecting anything that is
    /// not a text, integer or float scalar.
    pub fn from_json(value: &serde_json::Value) -> Result<Self> {
        match value {
            serde_json::Value::String(s) => Ok(Value::Text(s.clone())),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Value::Int(i))
                } else if n.is_u64() {
                    Err(CacheError::InputTypeRejected(format!(
                        "integer {} does not fit in i64",
                        n
                    )))
                } else {
                    n.as_f64().map(Value::Float).ok_or_else(|| {
                        CacheError::InputTypeRejected(format!("unrepresentable number {}", n))
                    })
                }
            }
            serde_json::Value::Null => Err(CacheError::InputTypeRejected("null".into())),
            serde_json::Value::Bool(_) => Err(CacheError::InputTypeRejected("bool".into())),
            serde_json::Value::Array(_) => Err(CacheError::InputTypeRejected("array".into())),
            serde_json::Value::Object(_) => Err(CacheError::InputTypeRejected("object".into())),
        }
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Bytes(b.to_vec())
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i64::from(i))
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

/// Key under which a stored value lives.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(pub String);

impl CacheKey {
    /// Allocate a fresh random key.
    pub fn generate() -> Self {
        CacheKey(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CacheKey({})", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Stable name of an instrumented operation.
///
/// The name is the root of the counter key and of both history lists, so
/// it must stay the same across restarts for history to accumulate.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct OperationId(Cow<'static, str>);

impl OperationId {
    /// Validate and build an identity.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if name.trim().is_empty()
            || name.ends_with(INPUTS_SUFFIX)
            || name.ends_with(OUTPUTS_SUFFIX)
        {
            return Err(CacheError::InvalidIdentity(name));
        }
        Ok(OperationId(Cow::Owned(name)))
    }

    /// Build an identity from a compile-time name without validation.
    pub const fn from_static(name: &'static str) -> Self {
        OperationId(Cow::Borrowed(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key of the call counter.
    pub fn counter_key(&self) -> &str {
        &self.0
    }

    /// Key of the list of rendered arguments.
    pub fn inputs_key(&self) -> String {
        format!("{}{}", self.0, INPUTS_SUFFIX)
    }

    /// Key of the list of rendered results.
    pub fn outputs_key(&self) -> String {
        format!("{}{}", self.0, OUTPUTS_SUFFIX)
    }
}

impl fmt::Debug for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OperationId({})", self.0)
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One replayed call: rendered arguments and rendered result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CallRecord {
    pub input: String,
    pub output: String,
}

/// Stable textual rendering of values written to the history lists.
pub trait Render {
    /// Rendering used for a call result.
    fn render(&self) -> String;

    /// Rendering used for an element inside an argument tuple.
    fn repr(&self) -> String {
        self.render()
    }
}

/// Rendering of a whole positional argument list.
pub trait RenderArgs {
    fn render_args(&self) -> String;
}

fn format_float(f: f64) -> String {
    if f.is_nan() {
        "nan".to_string()
    } else if f.is_infinite() {
        (if f > 0.0 { "inf" } else { "-inf" }).to_string()
    } else {
        format_finite(f)
    }
}

/// Shortest round-trip digits, positional for exponents in `-4..16` and
/// scientific with a signed two-digit exponent otherwise.
fn format_finite(f: f64) -> String {
    let sci = format!("{:e}", f);
    let Some((mantissa, exp)) = sci.split_once('e') else {
        return sci;
    };
    let Ok(exp) = exp.parse::<i32>() else {
        return sci;
    };
    let (sign, mantissa) = match mantissa.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", mantissa),
    };

    if !(-4..16).contains(&exp) {
        let exp_sign = if exp < 0 { '-' } else { '+' };
        return format!("{}{}e{}{:02}", sign, mantissa, exp_sign, exp.abs());
    }

    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let point = exp + 1;
    if point <= 0 {
        format!("{}0.{}{}", sign, "0".repeat(point.unsigned_abs() as usize), digits)
    } else if point as usize >= digits.len() {
        format!("{}{}{}.0", sign, digits, "0".repeat(point as usize - digits.len()))
    } else {
        let (whole, frac) = digits.split_at(point as usize);
        format!("{}{}.{}", sign, whole, frac)
    }
}

fn quote_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn render_bytes(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 3);
    out.push_str("b'");
    for &b in bytes {
        match b {
            b'\\' => out.push_str("\\\\"),
            b'\'' => out.push_str("\\'"),
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            0x20..=0x7e => out.push(b as char),
            _ => out.push_str(&format!("\\x{:02x}", b)),
        }
    }
    out.push('\'');
    out
}

impl Render for Value {
    fn render(&self) -> String {
        match self {
            Value::Text(s) => s.clone(),
            Value::Bytes(b) => render_bytes(b),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format_float(*f),
        }
    }

    fn repr(&self) -> String {
        match self {
            Value::Text(s) => quote_text(s),
            other => other.render(),
        }
    }
}

impl Render for String {
    fn render(&self) -> String {
        self.clone()
    }

    fn repr(&self) -> String {
        quote_text(self)
    }
}

impl Render for &str {
    fn render(&self) -> String {
        (*self).to_string()
    }

    fn repr(&self) -> String {
        quote_text(self)
    }
}

impl Render for Vec<u8> {
    fn render(&self) -> String {
        render_bytes(self)
    }
}

impl Render for i64 {
    fn render(&self) -> String {
        self.to_string()
    }
}

impl Render for usize {
    fn render(&self) -> String {
        self.to_string()
    }
}

impl Render for f64 {
    fn render(&self) -> String {
        format_float(*self)
    }
}

impl Render for bool {
    fn render(&self) -> String {
        (if *self { "True" } else { "False" }).to_string()
    }
}

impl Render for () {
    fn render(&self) -> String {
        "None".to_string()
    }
}

impl<T: Render> Render for Option<T> {
    fn render(&self) -> String {
        match self {
            Some(v) => v.render(),
            None => "None".to_string(),
        }
    }

    fn repr(&self) -> String {
        match self {
            Some(v) => v.repr(),
            None => "None".to_string(),
        }
    }
}

impl Render for CacheKey {
    fn render(&self) -> String {
        self.0.clone()
    }

    fn repr(&self) -> String {
        quote_text(&self.0)
    }
}

impl RenderArgs for () {
    fn render_args(&self) -> String {
        "()".to_string()
    }
}

impl<A: Render> RenderArgs for (A,) {
    fn render_args(&self) -> String {
        format!("({},)", self.0.repr())
    }
}

macro_rules! impl_render_args {
    ($($name:ident),+) => {
        impl<$($name: Render),+> RenderArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn render_args(&self) -> String {
                let ($($name,)+) = self;
                let parts: Vec<String> = vec![$($name.repr()),+];
                format!("({})", parts.join(", "))
            }
        }
    };
}

impl_render_args!(A, B);
impl_render_args!(A, B, C);
impl_render_args!(A, B, C, D);
