//! Attachment store for the next outgoing message.
//!
//! Items are keyed by [`AttachedContext::value`]; the first insertion of a key
//! wins and insertion order is preserved. Projections borrow from the store so
//! the prompt builder never holds its own copies.

use parley_types::{AttachedContext, FileRef, ImageRef, SlashCommandRef};

#[derive(Debug, Default, Clone)]
pub struct AttachmentStore {
    items: Vec<AttachedContext>,
    images_seen: u32,
}

impl AttachmentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `false` when an item with the same key is already attached.
    pub fn add(&mut self, item: AttachedContext) -> bool {
        if self.contains(item.value()) {
            return false;
        }
        self.items.push(item);
        true
    }

    #[must_use]
    pub fn contains(&self, value: &str) -> bool {
        self.items.iter().any(|item| item.value() == value)
    }

    pub fn remove(&mut self, value: &str) -> Option<AttachedContext> {
        let index = self.items.iter().position(|item| item.value() == value)?;
        Some(self.items.remove(index))
    }

    /// Remove an item and erase its display text from the draft input. Only a
    /// whitespace-delimited occurrence counts, so `@a.rs` leaves `@a.rs.bak`.
    pub fn remove_with_draft(&mut self, value: &str, draft: &mut String) -> Option<AttachedContext> {
        let removed = self.remove(value)?;
        let token = removed.display_text();
        if let Some(mut start) = find_token(draft, token) {
            let mut end = start + token.len();
            // Swallow one adjoining space so "a @x b" becomes "a b".
            if draft[end..].starts_with(' ') {
                end += 1;
            } else if draft[..start].ends_with(' ') {
                start -= 1;
            }
            draft.replace_range(start..end, "");
        }
        Some(removed)
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &AttachedContext> {
        self.items.iter()
    }

    pub fn files(&self) -> impl Iterator<Item = FileRef<'_>> {
        self.items.iter().filter_map(|item| match item {
            AttachedContext::File { value, kind, .. } => Some(FileRef { path: value, kind: *kind }),
            _ => None,
        })
    }

    pub fn slash_commands(&self) -> impl Iterator<Item = SlashCommandRef<'_>> {
        self.items.iter().filter_map(|item| match item {
            AttachedContext::SlashCommand {
                value, description, ..
            } => Some(SlashCommandRef {
                name: value.trim_start_matches('/'),
                description,
            }),
            _ => None,
        })
    }

    pub fn images(&self) -> impl Iterator<Item = ImageRef<'_>> {
        self.items.iter().filter_map(|item| match item {
            AttachedContext::Image {
                mime_type, data, ..
            } => Some(ImageRef::new(mime_type, data)),
            _ => None,
        })
    }

    /// Placeholder for the next pasted image: `[Image #1]`, `[Image #2]`, ...
    pub fn next_image_placeholder(&mut self) -> String {
        self.images_seen = self.images_seen.saturating_add(1);
        format!("[Image #{}]", self.images_seen)
    }
}

fn find_token(draft: &str, token: &str) -> Option<usize> {
    if token.is_empty() {
        return None;
    }
    draft.match_indices(token).map(|(start, _)| start).find(|&start| {
        let end = start + token.len();
        let opens = draft[..start].chars().next_back().is_none_or(char::is_whitespace);
        let closes = draft[end..].chars().next().is_none_or(char::is_whitespace);
        opens && closes
    })
}
