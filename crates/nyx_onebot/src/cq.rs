//! Outbound CQ-code string builder (§6): `[CQ:at,qq=123]`,
//! `[CQ:image,file=file:///...]`, and friends. The orchestrator composes a
//! plain-text reply plus a list of these to append (mentions, stored
//! emoji); this module owns only the string syntax, not the decision of
//! what to emit.

/// Escapes the four characters CQ-code syntax reserves (`&`, `[`, `]`, `,`)
/// inside a parameter value.
fn escape(value: &str) -> String {
    value.replace('&', "&amp;").replace('[', "&#91;").replace(']', "&#93;").replace(',', "&#44;")
}

pub fn at(qq: &str) -> String {
    format!("[CQ:at,qq={}]", escape(qq))
}

pub fn image_file(path: &str) -> String {
    format!("[CQ:image,file=file://{}]", escape(path))
}

pub fn image_url(url: &str) -> String {
    format!("[CQ:image,file={}]", escape(url))
}

pub fn face(id: &str) -> String {
    format!("[CQ:face,id={}]", escape(id))
}

pub fn reply(message_id: &str) -> String {
    format!("[CQ:reply,id={}]", escape(message_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_formats_qq() {
        assert_eq!(at("123"), "[CQ:at,qq=123]");
    }

    #[test]
    fn image_file_uses_file_uri() {
        assert_eq!(image_file("/tmp/x.jpg"), "[CQ:image,file=file:///tmp/x.jpg]");
    }

    #[test]
    fn escapes_reserved_characters() {
        assert_eq!(at("1,2"), "[CQ:at,qq=1&#44;2]");
    }
}
