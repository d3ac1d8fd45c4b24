//! HTML rendering for the upload page.

use base64::{engine::general_purpose, Engine as _};
use minijinja::Environment;
use serde::Serialize;

const INDEX_TEMPLATE: &str = "index.html";

/// Compiled templates, built once at startup.
pub struct Templates {
    env: Environment<'static>,
}

/// Context for `index.html`. Both fields are absent on the bare form.
#[derive(Debug, Default, Serialize)]
pub struct IndexPage {
    caption: Option<String>,
    /// Base64 of the bytes exactly as uploaded
    image_data: Option<String>,
}

impl IndexPage {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn captioned(caption: String, original: &[u8]) -> Self {
        Self {
            caption: Some(caption),
            image_data: Some(general_purpose::STANDARD.encode(original)),
        }
    }
}

impl Templates {
    pub fn new() -> Result<Self, minijinja::Error> {
        let mut env = Environment::new();
        // `.html` names get HTML auto-escaping
        env.add_template(INDEX_TEMPLATE, include_str!("../templates/index.html"))?;
        Ok(Self { env })
    }

    pub fn render_index(&self, page: &IndexPage) -> Result<String, minijinja::Error> {
        self.env.get_template(INDEX_TEMPLATE)?.render(page)
    }
}
