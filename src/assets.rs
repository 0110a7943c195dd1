use std::borrow::Cow;

use rust_embed::Embed;

#[derive(Embed)]
#[folder = "web/"]
struct WebAssets;

pub const CLIENT_HTML: &str = "client.html";
pub const CLIENT_JS: &str = "broadway.js";

/// An embedded file with its MIME type.
pub struct Asset {
    pub mime: String,
    pub data: Cow<'static, [u8]>,
}

pub fn get(name: &str) -> Option<Asset> {
    let file = WebAssets::get(name)?;
    Some(Asset {
        mime: mime_guess::from_path(name).first_or_text_plain().to_string(),
        data: file.data,
    })
}
