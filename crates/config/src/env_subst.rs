//! `${ENV_VAR}` substitution in raw config text, before TOML parsing.

/// Replace every `${NAME}` occurrence with the value of the `NAME`
/// environment variable, leaving the placeholder untouched if unset.
#[must_use]
pub fn substitute_env(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let bytes = raw.as_bytes();

    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && bytes.get(i + 1) == Some(&b'{') {
            if let Some(end) = raw[i + 2..].find('}') {
                let name = &raw[i + 2..i + 2 + end];
                match std::env::var(name) {
                    Ok(value) => out.push_str(&value),
                    Err(_) => {
                        out.push_str("${");
                        out.push_str(name);
                        out.push('}');
                    },
                }
                i += 2 + end + 1;
                continue;
            }
        }
        let Some(ch) = raw[i..].chars().next() else { break };
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_known_var() {
        unsafe {
            std::env::set_var("GW_TEST_SUBST_VAR", "hello");
        }
        let out = substitute_env("value = \"${GW_TEST_SUBST_VAR}\"");
        assert_eq!(out, "value = \"hello\"");
    }

    #[test]
    fn leaves_unknown_var_untouched() {
        let out = substitute_env("value = \"${GW_TEST_DEFINITELY_UNSET}\"");
        assert_eq!(out, "value = \"${GW_TEST_DEFINITELY_UNSET}\"");
    }
}
