//! Localized verification messages.

const DEFAULT_LOCALE: &str = "en-US";

struct Localized {
    locales: &'static [&'static str],
    sms_text: &'static str,
    email_subject: &'static str,
    email_intro: &'static str,
    email_outro: &'static str,
}

const MESSAGES: &[Localized] = &[
    Localized {
        locales: &["en", "en-US", "en-GB"],
        sms_text: "{realm} - verification code: {code}",
        email_subject: "{realm} - verify your email address",
        email_intro: "Use the following code to verify your email address.",
        email_outro: "If you did not request this code, you can ignore this message.",
    },
    Localized {
        locales: &["id", "id-ID"],
        sms_text: "{realm} - kode verifikasi Anda: {code}",
        email_subject: "{realm} - verifikasi alamat email Anda",
        email_intro: "Gunakan kode berikut untuk memverifikasi alamat email Anda.",
        email_outro: "Jika Anda tidak meminta kode ini, abaikan pesan ini.",
    },
];

/// Picks the messages for the first supported locale, falling back to
/// `en-US`. Locale matching ignores ASCII case.
fn localized(preferred_locales: &[String]) -> &'static Localized {
    let find = |locale: &str| {
        MESSAGES
            .iter()
            .find(|m| m.locales.iter().any(|l| l.eq_ignore_ascii_case(locale)))
    };
    preferred_locales
        .iter()
        .find_map(|locale| find(locale.as_str()))
        .or_else(|| find(DEFAULT_LOCALE))
        .unwrap_or(&MESSAGES[0])
}

fn fill(template: &str, realm: &str, code: &str) -> String {
    template.replace("{realm}", realm).replace("{code}", code)
}

/// SMS body in the SMS Retriever format: `<#> ` prefix and, when
/// configured, the app hash on its own line.
pub fn sms_body(
    realm: &str,
    code: &str,
    preferred_locales: &[String],
    retriever_app_hash: Option<&str>,
) -> String {
    let mut body = format!("<#> {}", fill(localized(preferred_locales).sms_text, realm, code));
    if let Some(hash) = retriever_app_hash.filter(|h| !h.is_empty()) {
        body.push('\n');
        body.push_str(hash);
    }
    body
}

/// Subject and HTML body of a verification email.
pub fn email_message(realm: &str, code: &str, preferred_locales: &[String]) -> (String, String) {
    let messages = localized(preferred_locales);
    let subject = fill(messages.email_subject, realm, code);
    let body = format!(
        "<!DOCTYPE html>\n\
         <html><head><meta charset=\"utf-8\"><title>{title}</title></head>\n\
         <body>\n\
         <p>{intro}</p>\n\
         <p style=\"font-size:24px;font-weight:bold;letter-spacing:4px\">{code}</p>\n\
         <p>{outro}</p>\n\
         <p>{realm}</p>\n\
         </body></html>\n",
        title = escape_html(&subject),
        intro = messages.email_intro,
        code = escape_html(code),
        outro = messages.email_outro,
        realm = escape_html(realm),
    );
    (subject, body)
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
