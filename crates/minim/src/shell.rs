use std::process::{Command, Stdio};

use log::trace;

/// Substitutes `{name}` segments in `text` using a balanced-brace scanner.
///
/// Nested braces are honoured, so `{outer {inner}}` scans as one segment.
/// Segments the resolver does not recognise stay verbatim (braces included).
pub(crate) fn interpolate(text: &str, resolve: impl Fn(&str) -> Option<String>) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut n = 0;
    while n < chars.len() {
        if chars[n] == '{' {
            let mut level = 0i32;
            let mut end = None;
            for (m, ch) in chars.iter().enumerate().skip(n) {
                match ch {
                    '{' => level += 1,
                    '}' => {
                        level -= 1;
                        if level == 0 {
                            end = Some(m);
                            break;
                        }
                    }
                    _ => {}
                }
            }
            if let Some(end) = end {
                let inner: String = chars[n + 1..end].iter().collect();
                if let Some(replacement) = resolve(inner.trim()) {
                    out.push_str(&replacement);
                    n = end + 1;
                    continue;
                }
            }
        }
        out.push(chars[n]);
        n += 1;
    }
    out
}

/// Splits a shell command into words: whitespace separates, single and
/// double quotes group, backslash escapes the next character.
pub(crate) fn split_words(text: &str) -> Vec<String> {
    #[derive(PartialEq)]
    enum Mode {
        Normal,
        Single,
        Double,
    }
    let mut parts = vec![String::new()];
    let mut mode = Mode::Normal;
    let mut escape = false;
    for ch in text.chars() {
        if escape {
            parts.last_mut().expect("non-empty").push(ch);
            escape = false;
            continue;
        }
        if ch == '\\' {
            escape = true;
            continue;
        }
        match mode {
            Mode::Double => {
                if ch == '"' {
                    mode = Mode::Normal;
                } else {
                    parts.last_mut().expect("non-empty").push(ch);
                }
            }
            Mode::Single => {
                if ch == '\'' {
                    mode = Mode::Normal;
                } else {
                    parts.last_mut().expect("non-empty").push(ch);
                }
            }
            Mode::Normal => match ch {
                ' ' | '\t' => {
                    if !parts.last().expect("non-empty").is_empty() {
                        parts.push(String::new());
                    }
                }
                '"' => mode = Mode::Double,
                '\'' => mode = Mode::Single,
                _ => parts.last_mut().expect("non-empty").push(ch),
            },
        }
    }
    if escape {
        parts.last_mut().expect("non-empty").push('\\');
    }
    if parts.last().is_some_and(String::is_empty) {
        parts.pop();
    }
    parts
}

/// Runs a command with inherited stdio (`$`) or captured combined output
/// (`$$`). Returns the captured text for the capturing form.
pub(crate) fn execute(words: &[String], capture: bool) -> Result<Option<String>, String> {
    let (program, args) = words.split_first().ok_or_else(|| "empty command".to_owned())?;
    trace!("shell: running {program} with {n} args", n = args.len());
    if capture {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .output()
            .map_err(|err| err.to_string())?;
        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() && combined.is_empty() {
            return Err(format!("command exited with {status}", status = output.status));
        }
        Ok(Some(combined))
    } else {
        let status = Command::new(program)
            .args(args)
            .stdin(Stdio::inherit())
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .status()
            .map_err(|err| err.to_string())?;
        if status.success() {
            Ok(None)
        } else {
            Err(format!("command exited with {status}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interpolation_substitutes_known_names() {
        let out = interpolate("echo {name} and {missing}", |key| {
            (key == "name").then(|| "minim".to_owned())
        });
        assert_eq!(out, "echo minim and {missing}");
    }

    #[test]
    fn interpolation_handles_nested_braces() {
        let out = interpolate("{a {b}} tail", |key| {
            (key == "a {b}").then(|| "X".to_owned())
        });
        assert_eq!(out, "X tail");
    }

    #[test]
    fn words_split_on_whitespace_with_quotes() {
        assert_eq!(
            split_words("ls -la \"my dir\" 'an other'"),
            vec!["ls", "-la", "my dir", "an other"]
        );
    }

    #[test]
    fn backslash_escapes_next_char() {
        assert_eq!(split_words(r"echo a\ b"), vec!["echo", "a b"]);
    }
}
