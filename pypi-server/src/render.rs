//! HTML pages for the simple index.
//!
//! Pages are askama templates, so every title, link text and href is escaped
//! when the page is built.

use askama::Template;

/// One anchor on an index page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub text: String,
    pub href: String,
}

impl Link {
    pub fn new(text: impl Into<String>, href: impl Into<String>) -> Self {
        Link {
            text: text.into(),
            href: href.into(),
        }
    }
}

#[derive(Template)]
#[template(path = "simple.html")]
struct SimplePageTemplate<'a> {
    title: &'a str,
    links: &'a [Link],
}

#[derive(Template)]
#[template(path = "welcome.html")]
struct WelcomePageTemplate<'a> {
    message: &'a str,
    project_count: usize,
    version: &'a str,
}

/// Render a PEP 503 link page.
pub fn render_simple_page(title: &str, links: &[Link]) -> Result<String, askama::Error> {
    SimplePageTemplate { title, links }.render()
}

pub fn render_welcome_page(message: &str, project_count: usize) -> Result<String, askama::Error> {
    WelcomePageTemplate {
        message,
        project_count,
        version: env!("CARGO_PKG_VERSION"),
    }
    .render()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_page_lists_links_in_order() {
        let links = [Link::new("alpha", "alpha/"), Link::new("beta", "beta/")];
        let html = render_simple_page("Simple index", &links).unwrap();

        assert!(html.contains("<title>Simple index</title>"));
        assert!(html.contains("pypi:repository-version"));
        let alpha = html.find(">alpha</a>").unwrap();
        let beta = html.find(">beta</a>").unwrap();
        assert!(alpha < beta);
    }

    #[test]
    fn test_simple_page_escapes_text_and_href() {
        let links = [Link::new("<script>alert(1)</script>", "x\"onmouseover=\"evil")];
        let html = render_simple_page("Links for <b>pkg</b>", &links).unwrap();

        assert!(!html.contains("<script>"));
        assert!(!html.contains("<b>"));
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("x\"onmouseover"));
    }

    #[test]
    fn test_empty_page_still_renders() {
        let html = render_simple_page("Simple index", &[]).unwrap();
        assert!(!html.contains("<a "));
    }

    #[test]
    fn test_welcome_page() {
        let html = render_welcome_page("Hello & welcome", 3).unwrap();
        assert!(html.contains("Hello &amp; welcome"));
        assert!(html.contains("3 project(s)"));
    }
}
