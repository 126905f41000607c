use url::form_urlencoded::byte_serialize;

use crate::traits::FileResolver;

/// Points images at the site's file proxy (`<base>?fileId=<ref>`). The proxy
/// fetches the bytes on demand; nothing is downloaded during a sync pass.
#[derive(Debug, Clone)]
pub struct ProxyFileResolver {
    base: String,
}

impl ProxyFileResolver {
    pub fn new(base: &str) -> Self {
        Self {
            base: base.trim_end_matches('?').to_string(),
        }
    }
}

impl FileResolver for ProxyFileResolver {
    fn resolve(&self, file_ref: &str) -> String {
        let encoded: String = byte_serialize(file_ref.as_bytes()).collect();
        let sep = if self.base.contains('?') { '&' } else { '?' };
        format!("{}{sep}fileId={encoded}", self.base)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_accessor_token() {
        let r = ProxyFileResolver::new("/api/telegram-file");
        assert_eq!(
            r.resolve("AgACAgIAAxkBAAIB"),
            "/api/telegram-file?fileId=AgACAgIAAxkBAAIB"
        );
    }

    #[test]
    fn reference_is_url_encoded() {
        let r = ProxyFileResolver::new("https://shop.example/file?");
        assert_eq!(r.resolve("a+b/c=="), "https://shop.example/file?fileId=a%2Bb%2Fc%3D%3D");
    }

    #[test]
    fn existing_query_is_extended() {
        let r = ProxyFileResolver::new("/file?v=2");
        assert_eq!(r.resolve("x"), "/file?v=2&fileId=x");
    }
}
