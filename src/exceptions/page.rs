//! Built-in error page, used when no view renders the fault.

use http::StatusCode;

use crate::fault::Fault;

/// Title shown for a status: `"404 | Not Found"`. A bare 500 reads
/// `Server Error` so it never suggests more than it knows.
pub(crate) fn title(status: StatusCode) -> String {
    let reason = if status == StatusCode::INTERNAL_SERVER_ERROR {
        "Server Error"
    } else {
        status.canonical_reason().unwrap_or("Error")
    };
    format!("{} | {reason}", status.as_u16())
}

pub(crate) fn render(fault: &Fault, status: StatusCode, debug: bool) -> String {
    let title = escape(&title(status));
    let body = if debug { details(fault) } else { format!("<h1>{title}</h1>") };

    format!(
        "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n</head>\n<body>\n{body}\n</body>\n</html>\n"
    )
}

fn details(fault: &Fault) -> String {
    let mut html = format!(
        "<h1>{}</h1>\n<p><code>{}</code></p>\n",
        escape(&fault.to_string()),
        escape(fault.type_name()),
    );

    if let Some(location) = fault.location() {
        html.push_str(&format!(
            "<p>{}:{}</p>\n",
            escape(location.file()),
            location.line()
        ));
    }

    let trace = fault.trace();
    if !trace.is_empty() {
        html.push_str("<pre>");
        html.push_str(&escape(&trace.join("\n")));
        html.push_str("</pre>\n");
    }

    html
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::HttpFault;

    #[test]
    fn titles() {
        assert_eq!(title(StatusCode::NOT_FOUND), "404 | Not Found");
        assert_eq!(title(StatusCode::INTERNAL_SERVER_ERROR), "500 | Server Error");
        assert_eq!(title(StatusCode::SERVICE_UNAVAILABLE), "503 | Service Unavailable");
    }

    #[test]
    fn production_page_hides_the_message() {
        let fault = Fault::msg("database password is hunter2");
        let page = render(&fault, StatusCode::INTERNAL_SERVER_ERROR, false);
        assert!(page.contains("500 | Server Error"));
        assert!(!page.contains("hunter2"));
        assert!(!page.contains(file!()));
    }

    #[test]
    fn debug_page_shows_escaped_details() {
        let fault: Fault = HttpFault::new(StatusCode::BAD_REQUEST, "<script>").into();
        let page = render(&fault, StatusCode::BAD_REQUEST, true);
        assert!(page.contains("&lt;script&gt;"));
        assert!(page.contains("keel::HttpFault"));
        assert!(page.contains(file!()));
    }
}
