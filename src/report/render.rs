//! Word cloud rendering.
//!
//! Text is segmented with jieba, counted, and laid out on an Archimedean
//! spiral from the centre of the canvas. Larger counts get larger glyphs;
//! a word that collides everywhere is shrunk and retried until it fits or
//! falls below the minimum size.

use std::collections::HashMap;
use std::io::Cursor;
use std::path::Path;

use ab_glyph::{FontVec, PxScale};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_text_mut, text_size};
use jieba_rs::Jieba;

use super::ReportError;

pub const DEFAULT_WIDTH: u32 = 1200;
pub const DEFAULT_HEIGHT: u32 = 800;
pub const MAX_WORDS: usize = 200;

const MAX_FONT_SIZE: f32 = 120.0;
const MIN_FONT_SIZE: f32 = 10.0;
const SHRINK: f32 = 0.85;
const SPIRAL_STEP: f32 = 0.1;
const SPIRAL_GROWTH: f32 = 2.0;
const WORD_MARGIN: u32 = 2;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const PALETTE: [Rgb<u8>; 6] = [
    Rgb([31, 119, 180]),
    Rgb([214, 39, 40]),
    Rgb([44, 160, 44]),
    Rgb([148, 103, 189]),
    Rgb([255, 127, 14]),
    Rgb([23, 190, 207]),
];

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from", "has", "have", "he",
    "her", "his", "in", "is", "it", "its", "me", "my", "no", "not", "of", "on", "or", "our",
    "she", "so", "that", "the", "their", "them", "they", "this", "to", "was", "we", "were",
    "what", "with", "you", "your",
];

/// A rendered report image
#[derive(Debug, Clone)]
pub struct Artifact {
    pub png: Vec<u8>,
    /// Number of words drawn
    pub words: usize,
}

/// Where one word ended up on the canvas
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub word: String,
    pub size: f32,
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    fn overlaps(&self, x: i32, y: i32, width: u32, height: u32) -> bool {
        let m = WORD_MARGIN as i32;
        x < self.x + self.width as i32 + m
            && self.x < x + width as i32 + m
            && y < self.y + self.height as i32 + m
            && self.y < y + height as i32 + m
    }
}

pub struct WordCloud {
    font: FontVec,
    jieba: Jieba,
    width: u32,
    height: u32,
}

impl WordCloud {
    /// Load the font (first face of a TTF/OTF/TTC) and the segmenter
    pub fn new(font_path: &Path, width: u32, height: u32) -> Result<Self, ReportError> {
        let data = std::fs::read(font_path).map_err(|source| ReportError::Font {
            path: font_path.to_path_buf(),
            source,
        })?;
        let font = FontVec::try_from_vec_and_index(data, 0)
            .map_err(|_| ReportError::InvalidFont(font_path.to_path_buf()))?;

        Ok(Self {
            font,
            jieba: Jieba::new(),
            width,
            height,
        })
    }

    /// Render `text` as a PNG word cloud. `None` when there is nothing to draw.
    pub fn render(&self, text: &str) -> Result<Option<Artifact>, ReportError> {
        let tokens = tokenize(&self.jieba, text);
        if tokens.is_empty() {
            return Ok(None);
        }

        let words = frequencies(&tokens);
        let placements = layout(&words, self.width, self.height, |word, size| {
            text_size(PxScale::from(size), &self.font, word)
        });
        if placements.is_empty() {
            return Ok(None);
        }

        let mut canvas = RgbImage::from_pixel(self.width, self.height, BACKGROUND);
        for (i, p) in placements.iter().enumerate() {
            draw_text_mut(
                &mut canvas,
                PALETTE[i % PALETTE.len()],
                p.x,
                p.y,
                PxScale::from(p.size),
                &self.font,
                &p.word,
            );
        }

        Ok(Some(Artifact {
            png: encode_png(&canvas)?,
            words: placements.len(),
        }))
    }
}

/// Segment text into lowercase words of two or more characters
pub fn tokenize(jieba: &Jieba, text: &str) -> Vec<String> {
    jieba
        .cut(text, false)
        .into_iter()
        .filter(|token| {
            token.chars().count() >= 2
                && token.chars().all(|c| c.is_alphanumeric() || c == '\'')
        })
        .map(|token| token.to_lowercase())
        .filter(|token| !STOP_WORDS.contains(&token.as_str()))
        .collect()
}

/// Word counts, most frequent first (ties alphabetical), capped at
/// [`MAX_WORDS`]
pub fn frequencies(tokens: &[String]) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for token in tokens {
        *counts.entry(token.as_str()).or_insert(0) += 1;
    }

    let mut words: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(word, count)| (word.to_string(), count))
        .collect();
    words.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    words.truncate(MAX_WORDS);
    words
}

/// Place words on the canvas in order. `measure` returns the pixel
/// size of a word at a given font size.
pub fn layout<F>(words: &[(String, usize)], width: u32, height: u32, measure: F) -> Vec<Placement>
where
    F: Fn(&str, f32) -> (u32, u32),
{
    let Some(max_count) = words.first().map(|(_, count)| *count as f32) else {
        return Vec::new();
    };

    let mut placed: Vec<Placement> = Vec::with_capacity(words.len());
    for (word, count) in words {
        let mut size = MIN_FONT_SIZE + (MAX_FONT_SIZE - MIN_FONT_SIZE) * (*count as f32 / max_count);

        while size >= MIN_FONT_SIZE {
            let (w, h) = measure(word, size);
            if let Some((x, y)) = find_spot(w, h, width, height, &placed) {
                placed.push(Placement {
                    word: word.clone(),
                    size,
                    x,
                    y,
                    width: w,
                    height: h,
                });
                break;
            }
            size *= SHRINK;
        }
    }
    placed
}

/// Walk the spiral outwards until a free rectangle is found
fn find_spot(w: u32, h: u32, width: u32, height: u32, placed: &[Placement]) -> Option<(i32, i32)> {
    if w == 0 || h == 0 || w > width || h > height {
        return None;
    }

    let (cx, cy) = (width as f32 / 2.0, height as f32 / 2.0);
    let aspect = height as f32 / width as f32;
    let max_radius = cx.hypot(cy) / aspect.min(1.0);

    let mut theta = 0.0f32;
    loop {
        let radius = SPIRAL_GROWTH * theta;
        if radius > max_radius {
            return None;
        }

        let x = (cx + radius * theta.cos() - w as f32 / 2.0).round() as i32;
        let y = (cy + radius * aspect * theta.sin() - h as f32 / 2.0).round() as i32;

        let inside = x >= 0
            && y >= 0
            && x as u32 + w <= width
            && y as u32 + h <= height;
        if inside && !placed.iter().any(|p| p.overlaps(x, y, w, h)) {
            return Some((x, y));
        }

        theta += SPIRAL_STEP;
    }
}

fn encode_png(canvas: &RgbImage) -> Result<Vec<u8>, ReportError> {
    let mut bytes = Cursor::new(Vec::new());
    canvas.write_to(&mut bytes, ImageFormat::Png)?;
    Ok(bytes.into_inner())
}
