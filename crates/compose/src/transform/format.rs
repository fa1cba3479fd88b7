//! printf-style formatting of a single value.
//!
//! Supports `%s %v %d %f %q %t %x %X %%` with the `-`, `+`, `0`, space and `#` flags,
//! a width and a precision. Formatting never fails: verbs that do not fit the value
//! render as `%!verb(type=value)`, extra verbs as `%!verb(MISSING)`, and an unused
//! value is appended as `%!(EXTRA type=value)`. Widths and precisions above one million
//! render as `%!(BADWIDTH)` / `%!(BADPREC)` and are ignored.

use serde_json::Value;

use super::as_integral;
use conflux_core::fieldpath::type_name;

const MAX_NUM: usize = 1_000_000;

#[derive(Default)]
struct Spec {
    minus: bool,
    plus: bool,
    zero: bool,
    space: bool,
    sharp: bool,
    width: Option<usize>,
    precision: Option<usize>,
}

/// Stringification used by `%s` and `%v`.
pub fn display(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => "<nil>".to_string(),
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.is_f64() => f.to_string(),
            _ => n.to_string(),
        },
        other => other.to_string(),
    }
}

pub fn sprintf(fmt: &str, arg: &Value) -> String {
    let mut out = String::with_capacity(fmt.len() + 16);
    let mut used = false;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        let mut spec = Spec::default();
        while let Some(&f) = chars.peek() {
            match f {
                '-' => spec.minus = true,
                '+' => spec.plus = true,
                '0' => spec.zero = true,
                ' ' => spec.space = true,
                '#' => spec.sharp = true,
                _ => break,
            }
            chars.next();
        }
        match digits(&mut chars) {
            Num::TooLarge => out.push_str("%!(BADWIDTH)"),
            Num::Absent => {}
            Num::Ok(n) => spec.width = Some(n),
        }
        if chars.peek() == Some(&'.') {
            chars.next();
            match digits(&mut chars) {
                Num::TooLarge => out.push_str("%!(BADPREC)"),
                Num::Absent => spec.precision = Some(0),
                Num::Ok(n) => spec.precision = Some(n),
            }
        }
        let Some(verb) = chars.next() else {
            out.push_str("%!(NOVERB)");
            break;
        };
        if verb == '%' {
            out.push('%');
            continue;
        }
        if used {
            out.push_str(&format!("%!{}(MISSING)", verb));
            continue;
        }
        used = true;
        out.push_str(&render(verb, &spec, arg));
    }
    if !used {
        out.push_str(&format!("%!(EXTRA {}={})", type_name(arg), display(arg)));
    }
    out
}

enum Num {
    Absent,
    Ok(usize),
    TooLarge,
}

/// All digits are consumed even once the number is out of range.
fn digits(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Num {
    let mut n = Num::Absent;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = match n {
            Num::Absent => Num::Ok(d as usize),
            Num::Ok(v) => match v * 10 + d as usize {
                v if v > MAX_NUM => Num::TooLarge,
                v => Num::Ok(v),
            },
            Num::TooLarge => Num::TooLarge,
        };
        chars.next();
    }
    n
}

fn bad_verb(verb: char, arg: &Value) -> String {
    format!("%!{}({}={})", verb, type_name(arg), display(arg))
}

fn render(verb: char, spec: &Spec, arg: &Value) -> String {
    match verb {
        's' | 'v' => {
            let mut s = if spec.sharp && verb == 'v' { arg.to_string() } else { display(arg) };
            if let Some(p) = spec.precision {
                if let Some((idx, _)) = s.char_indices().nth(p) {
                    s.truncate(idx);
                }
            }
            pad(s, spec, false)
        }
        'q' => pad(Value::String(display(arg)).to_string(), spec, false),
        't' => match arg {
            Value::Bool(b) => pad(b.to_string(), spec, false),
            _ => bad_verb(verb, arg),
        },
        'd' => match as_integral(arg) {
            Some(i) => pad(signed(i.unsigned_abs().to_string(), i < 0, spec), spec, true),
            None => bad_verb(verb, arg),
        },
        'x' | 'X' => {
            let s = match (arg, as_integral(arg)) {
                (Value::String(s), _) => s.bytes().map(|b| format!("{:02x}", b)).collect(),
                (_, Some(i)) => {
                    let hex = format!("{:x}", i.unsigned_abs());
                    let hex = if spec.sharp { format!("0x{}", hex) } else { hex };
                    signed(hex, i < 0, spec)
                }
                _ => return bad_verb(verb, arg),
            };
            let s = if verb == 'X' { s.to_uppercase() } else { s };
            pad(s, spec, true)
        }
        'f' | 'F' => match arg.as_f64() {
            Some(f) => {
                let body = format!("{:.*}", spec.precision.unwrap_or(6), f.abs());
                pad(signed(body, f.is_sign_negative() && f != 0.0, spec), spec, true)
            }
            None => bad_verb(verb, arg),
        },
        _ => bad_verb(verb, arg),
    }
}

fn signed(body: String, negative: bool, spec: &Spec) -> String {
    if negative {
        format!("-{}", body)
    } else if spec.plus {
        format!("+{}", body)
    } else if spec.space {
        format!(" {}", body)
    } else {
        body
    }
}

fn pad(s: String, spec: &Spec, numeric: bool) -> String {
    let Some(width) = spec.width else { return s };
    let len = s.chars().count();
    if len >= width {
        return s;
    }
    let fill = width - len;
    if spec.minus {
        format!("{}{}", s, " ".repeat(fill))
    } else if spec.zero && numeric {
        // Zeros go between the sign and the digits.
        let (sign, digits) = match s.chars().next() {
            Some(c @ ('-' | '+' | ' ')) => (c.to_string(), s[1..].to_string()),
            _ => (String::new(), s),
        };
        format!("{}{}{}", sign, "0".repeat(fill), digits)
    } else {
        format!("{}{}", " ".repeat(fill), s)
    }
}
