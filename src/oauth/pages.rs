//! Browser pages for the callback endpoint
//!
//! Both pages are static: nothing from the request or the failure is
//! rendered back to the browser.

const STYLE: &str = r"
        body {
            font-family: -apple-system, BlinkMacSystemFont, 'Segoe UI', Roboto, sans-serif;
            display: flex;
            justify-content: center;
            align-items: center;
            height: 100vh;
            margin: 0;
            color: #1f2328;
            background: #f6f8fa;
        }
        .card {
            text-align: center;
            padding: 2rem 2.5rem;
            background: #fff;
            border: 1px solid #d0d7de;
            border-radius: 12px;
            max-width: 420px;
        }
        .mark { font-size: 3rem; margin-bottom: 0.75rem; }
        h1 { margin: 0 0 0.5rem 0; font-size: 1.4rem; }
        p { margin: 0; color: #57606a; }
";

fn page(title: &str, mark: &str, message: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="utf-8">
    <title>{title}</title>
    <style>{STYLE}</style>
</head>
<body>
    <div class="card">
        <div class="mark">{mark}</div>
        <h1>{title}</h1>
        <p>{message}</p>
    </div>
</body>
</html>"#
    )
}

/// Shown after a completed sign-in without a redirect target.
pub(super) fn success_page() -> String {
    page(
        "Signed in",
        "✓",
        "Your account is connected. You can close this window and return to the chat.",
    )
}

/// Shown for every callback failure.
pub(super) fn error_page() -> String {
    page(
        "Sign-in failed",
        "✗",
        "The sign-in could not be completed. Start again from the chat to retry.",
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pages_are_complete_documents() {
        for html in [success_page(), error_page()] {
            assert!(html.starts_with("<!DOCTYPE html>"));
            assert!(html.trim_end().ends_with("</html>"));
        }
    }

    #[test]
    fn error_page_names_no_check() {
        let html = error_page();
        assert!(!html.contains("state"));
        assert!(!html.contains("code"));
    }
}
