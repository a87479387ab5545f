//! Minimal `application/x-www-form-urlencoded` decoding for the
//! configuration endpoints.

/// Returns the decoded value of `key`, or `None` when the field is absent.
pub fn form_value(body: &str, key: &str) -> Option<String> {
    for pair in body.split('&') {
        let mut parts = pair.splitn(2, '=');
        let name = parts.next()?;
        let value = parts.next().unwrap_or_default();
        if name == key {
            return Some(decode_component(value));
        }
    }

    None
}

/// Checkbox semantics: the field is truthy when present at all. Browsers
/// omit unchecked boxes entirely.
pub fn form_flag(body: &str, key: &str) -> bool {
    form_value(body, key).is_some()
}

fn decode_component(raw: &str) -> String {
    let mut out = Vec::with_capacity(raw.len());
    let bytes = raw.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b'%' => match hex_pair(bytes.get(i + 1).copied(), bytes.get(i + 2).copied()) {
                Some(byte) => {
                    out.push(byte);
                    i += 3;
                }
                // Malformed escapes pass through literally.
                None => {
                    out.push(b'%');
                    i += 1;
                }
            },
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(high: Option<u8>, low: Option<u8>) -> Option<u8> {
    let high = (high? as char).to_digit(16)?;
    let low = (low? as char).to_digit(16)?;
    Some((high * 16 + low) as u8)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_named_fields() {
        let body = "dev_id=esp32-01&cycle=60000&min=40&max=60";
        assert_eq!(form_value(body, "dev_id").as_deref(), Some("esp32-01"));
        assert_eq!(form_value(body, "cycle").as_deref(), Some("60000"));
        assert_eq!(form_value(body, "missing"), None);
    }

    #[test]
    fn decodes_plus_and_percent_escapes() {
        let body = "ssid=My+Home%2FNet&pass=p%40ss%26word";
        assert_eq!(form_value(body, "ssid").as_deref(), Some("My Home/Net"));
        assert_eq!(form_value(body, "pass").as_deref(), Some("p@ss&word"));
    }

    #[test]
    fn malformed_escapes_pass_through() {
        assert_eq!(form_value("k=100%", "k").as_deref(), Some("100%"));
        assert_eq!(form_value("k=%zz", "k").as_deref(), Some("%zz"));
    }

    #[test]
    fn empty_value_is_present_but_empty() {
        assert_eq!(form_value("ssid=&pass=x", "ssid").as_deref(), Some(""));
    }

    #[test]
    fn checkbox_flag_is_presence_based() {
        assert!(form_flag("section=auto&auto=on", "auto"));
        assert!(!form_flag("section=auto&min=40", "auto"));
    }
}
