//! Discord embed formatting for relayed posts.

use serde::Serialize;

use crate::source::Item;

/// Embed colour (Bluesky blue).
const EMBED_COLOR: u32 = 0x0085FF;
/// Discord's limit on embed descriptions, in characters.
const MAX_DESCRIPTION: usize = 4096;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Embed {
    pub description: String,
    pub color: u32,
    pub timestamp: String,
    pub url: String,
    pub author: EmbedAuthor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<EmbedImage>,
    pub fields: Vec<EmbedField>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedAuthor {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedImage {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Build the embed for one post.
///
/// The first image becomes the embed image; the rest are listed as link
/// fields because an embed can only show one.
pub fn format_embed(item: &Item) -> Embed {
    let mut fields: Vec<EmbedField> = item
        .media
        .iter()
        .enumerate()
        .skip(1)
        .map(|(i, media)| EmbedField {
            name: format!("Additional Image {}", i + 1),
            value: format!("[View Image]({})", media.url()),
            inline: true,
        })
        .collect();

    fields.push(EmbedField {
        name: "View on Bluesky".into(),
        value: format!("[Click here]({})", item.link),
        inline: false,
    });

    Embed {
        description: truncate(&item.text, MAX_DESCRIPTION),
        color: EMBED_COLOR,
        timestamp: item.created_at.to_rfc3339(),
        url: item.link.clone(),
        author: EmbedAuthor {
            name: item.author_label().to_string(),
            url: item.profile_link(),
        },
        image: item.media.first().map(|m| EmbedImage { url: m.url() }),
        fields,
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars - 1).collect();
    out.push('…');
    out
}
