use toml::Value;

use super::SettingsError;

/// Picks the variables under `prefix` and maps them to lowercase settings paths.
pub(super) fn env_entries(
    vars: impl IntoIterator<Item = (String, String)>,
    prefix: &str,
    separator: &str,
) -> Result<Vec<(Vec<String>, Value)>, SettingsError> {
    if separator.is_empty() {
        return Err(SettingsError::EmptySeparator);
    }

    let prefix_with_sep = format!("{prefix}{separator}");
    let mut entries: Vec<_> = vars
        .into_iter()
        .filter_map(|(key, value)| {
            let path_str = key.strip_prefix(&prefix_with_sep)?;
            if path_str.is_empty() {
                return None;
            }
            let path: Vec<String> = path_str.split(separator).map(str::to_lowercase).collect();
            Some((path, coerce_value(&value)))
        })
        .collect();

    // Env iteration order is unspecified; keep nested overrides deterministic.
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(entries)
}

/// Env values are untyped; read the obvious scalars, keep the rest as text.
fn coerce_value(raw: &str) -> Value {
    if raw.eq_ignore_ascii_case("true") || raw.eq_ignore_ascii_case("false") {
        return Value::Boolean(raw.eq_ignore_ascii_case("true"));
    }

    let digits = raw.strip_prefix('-').unwrap_or(raw);
    let parsed = if !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()) {
        raw.parse().ok().map(Value::Integer)
    } else if raw.contains('.') {
        raw.parse().ok().map(Value::Float)
    } else {
        None
    };
    parsed.unwrap_or_else(|| Value::String(raw.to_owned()))
}
