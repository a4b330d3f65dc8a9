// src/utils/html.rs

/// Whitelist sanitization for user-supplied rich text (product descriptions).
///
/// Safe tags such as `<b>` and `<p>` survive; `<script>` is dropped together
/// with its content, as are event-handler attributes.
pub fn clean_html(input: &str) -> String {
    ammonia::clean(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_scripts_and_handlers() {
        let cleaned = clean_html(r#"<p onclick="x()">Solid oak</p><script>alert(1)</script>"#);
        assert_eq!(cleaned, "<p>Solid oak</p>");
    }
}
