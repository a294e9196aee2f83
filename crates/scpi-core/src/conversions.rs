//! Token-level conversions between SCPI wire text and Rust scalars.
//!
//! All parsing here is locale independent: decimal point is always `.`,
//! booleans are the IEEE 488.2 `1`/`0`/`ON`/`OFF` tokens, and strings are
//! quoted with `"` where an embedded quote is doubled.

/// Split a comma separated response into tokens.
///
/// Commas inside `"..."` or `'...'` strings do not split. Surrounding
/// whitespace and the line terminator are stripped; quotes are kept so the
/// field decoder can decide whether to remove them. An empty response has
/// no tokens.
pub fn split_tokens(raw: &str) -> Vec<String> {
    let trimmed = raw.trim_end_matches(['\r', '\n']).trim();
    if trimmed.is_empty() {
        return Vec::new();
    }

    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut chars = trimmed.chars().peekable();

    while let Some(c) = chars.next() {
        match quote {
            Some(q) if c == q => {
                current.push(c);
                if chars.peek() == Some(&q) {
                    // Doubled quote stays inside the string
                    current.push(q);
                    chars.next();
                } else {
                    quote = None;
                }
            }
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                current.push(c);
            }
            None if c == ',' => {
                tokens.push(current.trim().to_string());
                current.clear();
            }
            None => current.push(c),
        }
    }
    tokens.push(current.trim().to_string());
    tokens
}

/// Decode a boolean token. Accepts `1`, `0`, `ON`, `OFF` in any case.
pub fn parse_bool(token: &str) -> Option<bool> {
    let t = token.trim();
    if t == "1" || t.eq_ignore_ascii_case("ON") {
        Some(true)
    } else if t == "0" || t.eq_ignore_ascii_case("OFF") {
        Some(false)
    } else {
        None
    }
}

/// Canonical boolean wire token.
pub fn format_bool(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

/// Parse a decimal number, returning `None` for anything that is not one.
///
/// `INF`/`INFinity` and `NINF`/`-INF` are the infinities. Other textual
/// values such as `INV` or `NAN` are rejected even though `f64::from_str`
/// would accept some of them; those are sentinels, not numbers.
pub fn parse_float(token: &str) -> Option<f64> {
    let t = token.trim();
    if let Some(inf) = parse_infinity(t) {
        return Some(inf);
    }
    if t.is_empty()
        || t
            .chars()
            .any(|c| c.is_ascii_alphabetic() && c != 'e' && c != 'E')
    {
        return None;
    }
    t.parse::<f64>().ok()
}

fn parse_infinity(t: &str) -> Option<f64> {
    let (negative, body) = match t.as_bytes().first()? {
        b'-' => (true, &t[1..]),
        b'+' => (false, &t[1..]),
        _ => match t.get(..1) {
            Some("N") | Some("n") if t.len() > 1 => (true, &t[1..]),
            _ => (false, t),
        },
    };
    if body.eq_ignore_ascii_case("INF") || body.eq_ignore_ascii_case("INFINITY") {
        Some(if negative {
            f64::NEG_INFINITY
        } else {
            f64::INFINITY
        })
    } else {
        None
    }
}

/// Format a float so that parsing it back yields the same value.
///
/// Infinities use the SCPI keywords `INF` and `NINF`. `NaN` has no numeric
/// spelling and is written as `NAN`.
pub fn format_float(value: f64) -> String {
    if value.is_nan() {
        "NAN".to_string()
    } else if value.is_infinite() {
        if value > 0.0 { "INF" } else { "NINF" }.to_string()
    } else {
        format!("{:?}", value)
    }
}

/// Parse an integer token.
///
/// Besides plain decimals this accepts the IEEE 488.2 non-decimal forms
/// `#H1F`, `#Q17`, `#B101` and integral float text such as `3.0` or `1E3`.
pub fn parse_int(token: &str) -> Option<i64> {
    let t = token.trim();
    if let Some(rest) = t.strip_prefix('#') {
        let (radix, digits) = match rest.chars().next()? {
            'H' | 'h' => (16, &rest[1..]),
            'Q' | 'q' => (8, &rest[1..]),
            'B' | 'b' => (2, &rest[1..]),
            _ => return None,
        };
        return i64::from_str_radix(digits, radix).ok();
    }
    if let Ok(v) = t.parse::<i64>() {
        return Some(v);
    }
    let f = parse_float(t)?;
    if f.fract() == 0.0 && f >= i64::MIN as f64 && f <= i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

/// Quote a string for transmission, doubling embedded `"`.
pub fn quote_string(value: &str) -> String {
    format!("\"{}\"", value.replace('"', "\"\""))
}

/// Remove one level of matching quotes and undo doubled inner quotes.
///
/// Unquoted tokens are returned unchanged.
pub fn unquote(token: &str) -> String {
    let t = token.trim();
    for q in ['"', '\''] {
        if t.len() >= 2 && t.starts_with(q) && t.ends_with(q) {
            let inner = &t[1..t.len() - 1];
            let doubled: String = [q, q].iter().collect();
            return inner.replace(&doubled, &q.to_string());
        }
    }
    t.to_string()
}

/// SCPI short form of a mnemonic: its uppercase letters and digits.
///
/// `CONTinuous` becomes `CONT`; an all-uppercase mnemonic is its own short
/// form.
pub fn short_form(mnemonic: &str) -> String {
    mnemonic
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Case-insensitive match of a token against a mnemonic's long or short form.
pub fn matches_mnemonic(token: &str, mnemonic: &str) -> bool {
    let t = token.trim();
    t.eq_ignore_ascii_case(mnemonic) || t.eq_ignore_ascii_case(&short_form(mnemonic))
}
