//! services/api/src/adapters/render.rs
//!
//! This module contains the adapter for rendering generated study text into a
//! downloadable document. It implements the `DocumentRenderService` port from
//! the `core` crate by converting the generator's markdown output into a
//! standalone HTML file.

use async_trait::async_trait;
use pulldown_cmark::{html, Parser};
use study_assistant_core::domain::ArtifactKind;
use study_assistant_core::ports::{DocumentRenderService, PortResult};

const PAGE_TEMPLATE: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>{title}</title>
<style>
body { font-family: Georgia, serif; max-width: 46rem; margin: 2rem auto; line-height: 1.6; }
h1, h2, h3 { font-family: Helvetica, Arial, sans-serif; }
</style>
</head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>
"#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that renders study artifacts as self-contained HTML documents.
#[derive(Clone, Default)]
pub struct HtmlRenderAdapter;

impl HtmlRenderAdapter {
    /// Creates a new `HtmlRenderAdapter`.
    pub fn new() -> Self {
        Self
    }
}

//=========================================================================================
// `DocumentRenderService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DocumentRenderService for HtmlRenderAdapter {
    async fn render(&self, title: &str, body: &str, _kind: ArtifactKind) -> PortResult<Vec<u8>> {
        let mut rendered = String::with_capacity(body.len() * 2);
        html::push_html(&mut rendered, Parser::new(body));

        let page = PAGE_TEMPLATE
            .replace("{title}", &escape_html(title))
            .replace("{body}", &rendered);

        Ok(page.into_bytes())
    }
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
