//! String formatting: format specs (`f"{x:>8.2f}"`), `%` interpolation and
//! `str.format`.

use crate::runtime::interpreter::{Eval, Interpreter};
use crate::runtime::value::*;

/// Parsed `[[fill]align][sign][0][width][,][.precision][type]`.
#[derive(Debug, Clone, PartialEq)]
struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    width: usize,
    grouping: bool,
    precision: Option<usize>,
    ty: Option<char>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            width: 0,
            grouping: false,
            precision: None,
            ty: None,
        }
    }
}

fn parse_spec(text: &str) -> Option<Spec> {
    let chars: Vec<char> = text.chars().collect();
    let mut spec = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');
    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = chars[0];
        spec.align = Some(chars[1]);
        i = 2;
    } else if chars.first().copied().is_some_and(is_align) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i) {
        if matches!(c, '+' | '-' | ' ') {
            spec.sign = c;
            i += 1;
        }
    }
    if chars.get(i) == Some(&'0') {
        if spec.align.is_none() {
            spec.fill = '0';
            spec.align = Some('=');
        }
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
        i += 1;
    }
    if i > start {
        spec.width = chars[start..i].iter().collect::<String>().parse().ok()?;
    }
    if chars.get(i) == Some(&',') {
        spec.grouping = true;
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i == start {
            return None;
        }
        spec.precision = Some(chars[start..i].iter().collect::<String>().parse().ok()?);
    }
    if let Some(&c) = chars.get(i) {
        spec.ty = Some(c);
        i += 1;
    }
    (i == chars.len()).then_some(spec)
}

fn group_thousands(digits: &str) -> String {
    let (int_part, rest) = match digits.find(|c: char| !c.is_ascii_digit()) {
        Some(pos) => digits.split_at(pos),
        None => (digits, ""),
    };
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out.push_str(rest);
    out
}

/// Python-style exponent notation: `1.500000e+03`.
fn exponent(x: f64, precision: usize, upper: bool) -> String {
    let text = format!("{:.*e}", precision, x);
    let (mantissa, exp) = text.split_once('e').unwrap_or((&text, "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    let e = if upper { 'E' } else { 'e' };
    format!("{}{}{}{:02}", mantissa, e, if exp < 0 { '-' } else { '+' }, exp.abs())
}

/// `g` presentation: fixed or exponent depending on magnitude, trailing
/// zeros removed.
fn general(x: f64, precision: usize, upper: bool) -> String {
    let p = precision.max(1);
    if x == 0.0 {
        return "0".to_string();
    }
    if !x.is_finite() {
        return fixed_special(x, upper).unwrap_or_default();
    }
    let exp = format!("{:.*e}", p - 1, x)
        .split_once('e')
        .and_then(|(_, e)| e.parse::<i32>().ok())
        .unwrap_or(0);
    let text = if exp >= -4 && exp < p as i32 {
        format!("{:.*}", (p as i32 - 1 - exp).max(0) as usize, x)
    } else {
        exponent(x, p - 1, upper)
    };
    strip_zeros(&text)
}

fn strip_zeros(text: &str) -> String {
    let (mantissa, suffix) = match text.find(['e', 'E']) {
        Some(pos) => text.split_at(pos),
        None => (text, ""),
    };
    let mantissa = if mantissa.contains('.') {
        mantissa.trim_end_matches('0').trim_end_matches('.')
    } else {
        mantissa
    };
    format!("{}{}", mantissa, suffix)
}

fn fixed_special(x: f64, upper: bool) -> Option<String> {
    let text = if x.is_nan() {
        "nan"
    } else if x.is_infinite() {
        "inf"
    } else {
        return None;
    };
    Some(if upper { text.to_uppercase() } else { text.to_string() })
}

fn pad(body: &str, sign: &str, spec: &Spec, default_align: char) -> String {
    let len = body.chars().count() + sign.chars().count();
    if len >= spec.width {
        return format!("{}{}", sign, body);
    }
    let fill_len = spec.width - len;
    let fill = |n: usize| spec.fill.to_string().repeat(n);
    match spec.align.unwrap_or(default_align) {
        '<' => format!("{}{}{}", sign, body, fill(fill_len)),
        '^' => format!(
            "{}{}{}{}",
            fill(fill_len / 2),
            sign,
            body,
            fill(fill_len - fill_len / 2)
        ),
        '=' => format!("{}{}{}", sign, fill(fill_len), body),
        _ => format!("{}{}{}", fill(fill_len), sign, body),
    }
}

fn sign_text(negative: bool, spec: &Spec) -> &'static str {
    match (negative, spec.sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

impl<'t> Interpreter<'t> {
    /// `format(value, spec)`
    pub(crate) fn format_value(&mut self, value: &Value, spec_text: &str) -> Eval<String> {
        if spec_text.is_empty() {
            return self.to_str(value);
        }
        let Some(spec) = parse_spec(spec_text) else {
            return self.value_error("Invalid format specifier");
        };
        match value {
            Value::Str(s) => {
                if !matches!(spec.ty, None | Some('s')) {
                    return self.unknown_code(&spec, value);
                }
                if spec.align == Some('=') {
                    return self.value_error("'=' alignment not allowed in string format specifier");
                }
                let body: String = match spec.precision {
                    Some(p) => s.chars().take(p).collect(),
                    None => s.to_string(),
                };
                Ok(pad(&body, "", &spec, '<'))
            }
            Value::Float(x) => self.format_float_spec(*x, &spec, value),
            Value::Int(_) | Value::Bool(_) => {
                let i = value.as_int().unwrap_or(0);
                match spec.ty {
                    None | Some('d') | Some('n') => {
                        let digits = i.unsigned_abs().to_string();
                        let digits = if spec.grouping { group_thousands(&digits) } else { digits };
                        Ok(pad(&digits, sign_text(i < 0, &spec), &spec, '>'))
                    }
                    Some(radix @ ('x' | 'X' | 'o' | 'b')) => {
                        let magnitude = i.unsigned_abs();
                        let digits = match radix {
                            'x' => format!("{:x}", magnitude),
                            'X' => format!("{:X}", magnitude),
                            'o' => format!("{:o}", magnitude),
                            _ => format!("{:b}", magnitude),
                        };
                        Ok(pad(&digits, sign_text(i < 0, &spec), &spec, '>'))
                    }
                    Some('c') => match u32::try_from(i).ok().and_then(char::from_u32) {
                        Some(c) => Ok(pad(&c.to_string(), "", &spec, '<')),
                        None => Err(self.error(ExcKind::OverflowError, "%c arg not in range(0x110000)")),
                    },
                    Some('f' | 'F' | 'e' | 'E' | 'g' | 'G' | '%') => {
                        self.format_float_spec(i as f64, &spec, value)
                    }
                    Some(_) => self.unknown_code(&spec, value),
                }
            }
            other => self.type_error(format!(
                "unsupported format string passed to {}.__format__",
                self.type_name(other)
            )),
        }
    }

    fn unknown_code<T>(&self, spec: &Spec, value: &Value) -> Eval<T> {
        self.value_error(format!(
            "Unknown format code '{}' for object of type '{}'",
            spec.ty.unwrap_or(' '),
            self.type_name(value)
        ))
    }

    fn format_float_spec(&self, x: f64, spec: &Spec, value: &Value) -> Eval<String> {
        let magnitude = x.abs();
        let upper = matches!(spec.ty, Some('F' | 'E' | 'G'));
        let body = match spec.ty {
            Some('f' | 'F') => fixed_special(magnitude, upper)
                .unwrap_or_else(|| format!("{:.*}", spec.precision.unwrap_or(6), magnitude)),
            Some('%') => fixed_special(magnitude, false)
                .map(|s| format!("{}%", s))
                .unwrap_or_else(|| format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0)),
            Some('e' | 'E') => fixed_special(magnitude, upper)
                .unwrap_or_else(|| exponent(magnitude, spec.precision.unwrap_or(6), upper)),
            Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6), upper),
            None => match spec.precision {
                Some(p) => general(magnitude, p, false),
                None => format_float(magnitude),
            },
            Some(_) => return self.unknown_code(spec, value),
        };
        let body = if spec.grouping { group_thousands(&body) } else { body };
        let negative = x.is_sign_negative() && !x.is_nan();
        Ok(pad(&body, sign_text(negative, spec), spec, '>'))
    }

    /// `fmt % args`
    pub(crate) fn percent_format(&mut self, fmt: &str, args: &Value) -> Eval<String> {
        let values = match args.as_obj().map(|id| self.heap.get(id)) {
            Some(Object::Tuple(items)) => items.clone(),
            _ => vec![args.clone()],
        };
        let mut next = values.into_iter();
        let mut out = String::with_capacity(fmt.len());
        let mut chars = fmt.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                out.push(c);
                continue;
            }
            let mut spec = Spec::default();
            let mut left = false;
            while let Some(&flag) = chars.peek() {
                match flag {
                    '-' => left = true,
                    '+' | ' ' => spec.sign = flag,
                    '0' => spec.fill = '0',
                    '#' => {}
                    _ => break,
                }
                chars.next();
            }
            let mut width = String::new();
            while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                width.push(d);
                chars.next();
            }
            spec.width = width.parse().unwrap_or(0);
            if chars.peek() == Some(&'.') {
                chars.next();
                let mut precision = String::new();
                while let Some(&d) = chars.peek().filter(|d| d.is_ascii_digit()) {
                    precision.push(d);
                    chars.next();
                }
                spec.precision = Some(precision.parse().unwrap_or(0));
            }
            let Some(conversion) = chars.next() else {
                return self.value_error("incomplete format");
            };
            if conversion == '%' {
                out.push('%');
                continue;
            }
            let Some(arg) = next.next() else {
                return self.type_error("not enough arguments for format string");
            };
            spec.align = Some(if left {
                spec.fill = ' ';
                '<'
            } else if spec.fill == '0' {
                '='
            } else {
                '>'
            });
            let text = match conversion {
                's' | 'r' => {
                    let text = if conversion == 's' { self.to_str(&arg)? } else { self.repr(&arg)? };
                    let text: String = match spec.precision {
                        Some(p) => text.chars().take(p).collect(),
                        None => text,
                    };
                    spec.fill = ' ';
                    pad(&text, "", &spec, '>')
                }
                'd' | 'i' | 'x' | 'X' | 'o' | 'c' => {
                    let int = match &arg {
                        Value::Float(x) if conversion == 'd' || conversion == 'i' => Value::Int(x.trunc() as i64),
                        v if v.as_int().is_some() => v.clone(),
                        other => {
                            return self.type_error(format!(
                                "%{} format: an integer is required, not {}",
                                conversion,
                                self.type_name(other)
                            ))
                        }
                    };
                    spec.ty = Some(if conversion == 'i' { 'd' } else { conversion });
                    spec.precision = None;
                    self.format_value_spec(&int, &spec)?
                }
                'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                    let Some(x) = arg.as_float() else {
                        return self.type_error(format!(
                            "must be real number, not {}",
                            self.type_name(&arg)
                        ));
                    };
                    spec.ty = Some(conversion);
                    self.format_float_spec(x, &spec, &arg)?
                }
                other => {
                    return self.value_error(format!(
                        "unsupported format character '{}' (0x{:x})",
                        other, other as u32
                    ))
                }
            };
            out.push_str(&text);
        }
        if next.next().is_some() {
            return self.type_error("not all arguments converted during string formatting");
        }
        Ok(out)
    }

    fn format_value_spec(&mut self, value: &Value, spec: &Spec) -> Eval<String> {
        let mut text = String::new();
        if spec.fill != ' ' || spec.align.is_some() {
            text.push(spec.fill);
            text.push(spec.align.unwrap_or('>'));
        }
        if spec.sign != '-' {
            text.push(spec.sign);
        }
        if spec.width > 0 {
            text.push_str(&spec.width.to_string());
        }
        if let Some(p) = spec.precision {
            text.push('.');
            text.push_str(&p.to_string());
        }
        if let Some(ty) = spec.ty {
            text.push(ty);
        }
        self.format_value(value, &text)
    }

    /// `fmt.format(*args, **kwargs)`
    pub(crate) fn str_format(
        &mut self,
        fmt: &str,
        args: &[Value],
        kwargs: &[(String, Value)],
    ) -> Eval<String> {
        let mut out = String::with_capacity(fmt.len());
        let mut chars = fmt.chars().peekable();
        let mut auto = 0usize;
        while let Some(c) = chars.next() {
            match c {
                '{' if chars.peek() == Some(&'{') => {
                    chars.next();
                    out.push('{');
                }
                '}' if chars.peek() == Some(&'}') => {
                    chars.next();
                    out.push('}');
                }
                '}' => return self.value_error("Single '}' encountered in format string"),
                '{' => {
                    let mut field = String::new();
                    let mut depth = 1;
                    loop {
                        match chars.next() {
                            Some('{') => {
                                depth += 1;
                                field.push('{');
                            }
                            Some('}') => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                                field.push('}');
                            }
                            Some(other) => field.push(other),
                            None => return self.value_error("Single '{' encountered in format string"),
                        }
                    }
                    let (head, spec) = match field.split_once(':') {
                        Some((head, spec)) => (head, spec),
                        None => (field.as_str(), ""),
                    };
                    let (name, conversion) = match head.split_once('!') {
                        Some((name, conv)) => (name, Some(conv)),
                        None => (head, None),
                    };
                    let value = if name.is_empty() {
                        let value = args.get(auto).cloned();
                        auto += 1;
                        value
                    } else if let Ok(index) = name.parse::<usize>() {
                        args.get(index).cloned()
                    } else {
                        kwargs.iter().find(|(k, _)| k == name).map(|(_, v)| v.clone())
                    };
                    let Some(value) = value else {
                        if name.is_empty() || name.parse::<usize>().is_ok() {
                            return Err(self.error(
                                ExcKind::IndexError,
                                "Replacement index out of range for positional args tuple",
                            ));
                        }
                        return Err(self.error(ExcKind::KeyError, quote_str(name)));
                    };
                    let value = match conversion {
                        None => value,
                        Some("r") => Value::Str(self.repr(&value)?.into()),
                        Some("s") => Value::Str(self.to_str(&value)?.into()),
                        Some(other) => {
                            return self.value_error(format!(
                                "Unknown conversion specifier {}",
                                other
                            ))
                        }
                    };
                    out.push_str(&self.format_value(&value, spec)?);
                }
                other => out.push(other),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_parsing() {
        let spec = parse_spec("*^10,.2f").unwrap();
        assert_eq!(spec.fill, '*');
        assert_eq!(spec.align, Some('^'));
        assert_eq!(spec.width, 10);
        assert!(spec.grouping);
        assert_eq!(spec.precision, Some(2));
        assert_eq!(spec.ty, Some('f'));

        let zero = parse_spec("05d").unwrap();
        assert_eq!((zero.fill, zero.align, zero.width), ('0', Some('='), 5));

        assert!(parse_spec("10.f").is_none());
        assert!(parse_spec("dd").is_none());
    }

    #[test]
    fn helpers_match_python_presentation() {
        assert_eq!(group_thousands("1234567.891"), "1,234,567.891");
        assert_eq!(group_thousands("123"), "123");
        assert_eq!(exponent(1500.0, 2, false), "1.50e+03");
        assert_eq!(exponent(0.00012, 1, true), "1.2E-04");
        assert_eq!(general(0.0001234, 6, false), "0.0001234");
        assert_eq!(general(1234567.0, 3, false), "1.23e+06");
        assert_eq!(general(2.5, 6, false), "2.5");
        let spec = parse_spec("<6").unwrap();
        assert_eq!(pad("ab", "", &spec, '>'), "ab    ");
        let spec = parse_spec("=+8").unwrap();
        assert_eq!(pad("42", "+", &spec, '>'), "+     42");
    }
}
