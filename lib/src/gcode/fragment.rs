//! Structured G-code output with pending substitution markers.
//!
//! The wipe tower cannot know the user's custom toolchange G-code or how the
//! downstream generator deretracts. It leaves [`Placeholder`] markers in a
//! [`GCodeFragment`] instead, and the consumer resolves them with
//! [`GCodeFragment::render_with`]. Rendering with [`fmt::Display`] writes the
//! bracket tokens used by text-based post-processors.

use std::fmt;

/// A marker the downstream G-code generator must replace.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Placeholder {
    /// Custom toolchange G-code for switching `from` -> `to`.
    ToolchangeGcode { from: usize, to: usize },
    /// Deretraction performed by the generator after the toolchange.
    Deretraction,
    /// Move the nozzle back to the layer's print height.
    ZResync { z: f32 },
}

impl Placeholder {
    /// Bracket token written when the fragment is rendered as plain text.
    pub fn token(&self) -> &'static str {
        match self {
            Placeholder::ToolchangeGcode { .. } => "[toolchange_gcode_from_wipe_tower_generator]",
            Placeholder::Deretraction => "[deretraction_from_wipe_tower_generator]",
            Placeholder::ZResync { .. } => "[z_resync_from_wipe_tower_generator]",
        }
    }

    /// Expansion used when the consumer supplies nothing better.
    pub fn default_expansion(&self) -> String {
        match self {
            Placeholder::ToolchangeGcode { to, .. } => format!("T{to}\n"),
            Placeholder::Deretraction => String::new(),
            Placeholder::ZResync { z } => format!("G1 Z{z:.3}\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum GCodeChunk {
    Text(String),
    Placeholder(Placeholder),
}

/// G-code text interleaved with placeholders.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GCodeFragment {
    chunks: Vec<GCodeChunk>,
}

impl GCodeFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_str(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.chunks.last_mut() {
            Some(GCodeChunk::Text(last)) => last.push_str(text),
            _ => self.chunks.push(GCodeChunk::Text(text.to_string())),
        }
    }

    /// Placeholders always occupy whole lines.
    pub fn push_placeholder(&mut self, placeholder: Placeholder) {
        self.chunks.push(GCodeChunk::Placeholder(placeholder));
    }

    /// Append another fragment, merging adjacent text.
    pub fn append(&mut self, other: GCodeFragment) {
        for chunk in other.chunks {
            match chunk {
                GCodeChunk::Text(text) => self.push_str(&text),
                GCodeChunk::Placeholder(p) => self.push_placeholder(p),
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn chunks(&self) -> &[GCodeChunk] {
        &self.chunks
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.chunks.iter().filter_map(|c| match c {
            GCodeChunk::Placeholder(p) => Some(p),
            GCodeChunk::Text(_) => None,
        })
    }

    /// Text portions only, placeholders dropped.
    pub fn text_lines(&self) -> impl Iterator<Item = &str> {
        self.chunks
            .iter()
            .filter_map(|c| match c {
                GCodeChunk::Text(t) => Some(t.as_str()),
                GCodeChunk::Placeholder(_) => None,
            })
            .flat_map(str::lines)
    }

    /// Render to text, resolving each placeholder through `resolve`.
    ///
    /// `None` from the resolver falls back to [`Placeholder::default_expansion`].
    pub fn render_with<F>(&self, mut resolve: F) -> String
    where
        F: FnMut(&Placeholder) -> Option<String>,
    {
        let mut out = String::new();
        for chunk in &self.chunks {
            match chunk {
                GCodeChunk::Text(text) => out.push_str(text),
                GCodeChunk::Placeholder(p) => {
                    let mut expansion = resolve(p).unwrap_or_else(|| p.default_expansion());
                    if !expansion.is_empty() && !expansion.ends_with('\n') {
                        expansion.push('\n');
                    }
                    out.push_str(&expansion);
                }
            }
        }
        out
    }
}

impl fmt::Display for GCodeFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in &self.chunks {
            match chunk {
                GCodeChunk::Text(text) => f.write_str(text)?,
                GCodeChunk::Placeholder(p) => writeln!(f, "{}", p.token())?,
            }
        }
        Ok(())
    }
}
