//! Loss curves of a training run rendered to a PNG, with a title carrying the
//! final accuracy, axis labels and a train/test legend.
//!
//! Text is drawn from the 8x8 bitmap glyphs of `font8x8`, so no font file is
//! needed at runtime.

use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;
use std::path::Path;

use crate::error::Result;
use crate::training::TrainingLog;

pub const WIDTH: u32 = 800;
pub const HEIGHT: u32 = 600;
const MARGIN: f32 = 70.0;
const TICK_LEN: f32 = 6.0;
const Y_TICKS: usize = 5;
const GLYPH_SIZE: u32 = 8;
const TITLE_SCALE: u32 = 2;
/// Rows above the plot area reserved for the title
pub const TITLE_BAND: u32 = 40;

const BACKGROUND: Rgb<u8> = Rgb([255, 255, 255]);
const AXIS_COLOR: Rgb<u8> = Rgb([0, 0, 0]);
const GRID_COLOR: Rgb<u8> = Rgb([225, 225, 225]);
pub const TRAIN_COLOR: Rgb<u8> = Rgb([31, 119, 180]);
pub const TEST_COLOR: Rgb<u8> = Rgb([255, 127, 14]);

pub fn title(log: &TrainingLog) -> String {
    format!(
        "Train/test loss curves, final accuracy: {:.1}%",
        log.final_accuracy().unwrap_or(0f64)
    )
}

fn text_width(text: &str, scale: u32) -> u32 {
    text.chars().count() as u32 * GLYPH_SIZE * scale
}

/// Draw `text` with its top-left corner at (x, y). Characters without a glyph
/// are left blank
fn draw_text(image: &mut RgbImage, x: i32, y: i32, scale: u32, text: &str, color: Rgb<u8>) {
    let advance = (GLYPH_SIZE * scale) as i32;

    for (idx, c) in text.chars().enumerate() {
        let Some(glyph) = BASIC_FONTS.get(c) else {
            continue;
        };
        let left = x + idx as i32 * advance;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                // bit 0 is the leftmost pixel
                if bits & (1 << col) != 0 {
                    let px = left + (col * scale) as i32;
                    let py = y + (row as u32 * scale) as i32;
                    draw_filled_rect_mut(image, Rect::at(px, py).of_size(scale, scale), color);
                }
            }
        }
    }
}

/// Maps epochs and losses to pixel coordinates
struct Frame {
    num_epochs: usize,
    min_loss: f64,
    max_loss: f64,
}

impl Frame {
    fn new(log: &TrainingLog) -> Frame {
        let losses = log
            .records()
            .iter()
            .flat_map(|r| [r.train_loss, r.test_loss])
            .filter(|x| x.is_finite());
        let (min, max) = losses.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), x| {
            (lo.min(x), hi.max(x))
        });
        let (min, max) = if min > max {
            (0f64, 1f64)
        } else if max - min < 1e-12 {
            (min - 0.5, max + 0.5)
        } else {
            let pad = 0.05 * (max - min);
            (min - pad, max + pad)
        };

        Frame {
            num_epochs: log.len(),
            min_loss: min,
            max_loss: max,
        }
    }

    fn x(&self, epoch: usize) -> f32 {
        let width = WIDTH as f32 - 2.0 * MARGIN;
        if self.num_epochs <= 1 {
            return MARGIN + width / 2.0;
        }

        MARGIN + width * (epoch - 1) as f32 / (self.num_epochs - 1) as f32
    }

    fn y(&self, loss: f64) -> f32 {
        let height = HEIGHT as f32 - 2.0 * MARGIN;
        let fraction = ((loss - self.min_loss) / (self.max_loss - self.min_loss)) as f32;

        HEIGHT as f32 - MARGIN - height * fraction
    }
}

fn draw_curve(image: &mut RgbImage, frame: &Frame, points: &[(usize, f64)], color: Rgb<u8>) {
    let points: Vec<(f32, f32)> = points
        .iter()
        .filter(|(_, loss)| loss.is_finite())
        .map(|&(epoch, loss)| (frame.x(epoch), frame.y(loss)))
        .collect();

    for pair in points.windows(2) {
        draw_line_segment_mut(image, pair[0], pair[1], color);
    }
    for &(x, y) in &points {
        let marker = Rect::at(x.round() as i32 - 2, y.round() as i32 - 2).of_size(5, 5);
        draw_filled_rect_mut(image, marker, color);
    }
}

fn draw_legend(image: &mut RgbImage, right: f32, top: f32) {
    let entries = [("Train loss", TRAIN_COLOR), ("Test loss", TEST_COLOR)];
    let width = entries
        .iter()
        .map(|(label, _)| text_width(label, 1))
        .max()
        .unwrap_or(0) as f32
        + 34.0;
    let left = right - width - 10.0;

    for (idx, (label, color)) in entries.iter().enumerate() {
        let y = top + 12.0 + idx as f32 * 16.0;
        draw_line_segment_mut(image, (left, y + 4.0), (left + 20.0, y + 4.0), *color);
        draw_text(image, (left + 28.0) as i32, y as i32, 1, label, AXIS_COLOR);
    }
}

/// Draw the per-epoch train and test losses, one x tick per epoch
pub fn render_losses(log: &TrainingLog) -> RgbImage {
    let mut image = RgbImage::from_pixel(WIDTH, HEIGHT, BACKGROUND);
    let frame = Frame::new(log);
    let (left, right) = (MARGIN, WIDTH as f32 - MARGIN);
    let (top, bottom) = (MARGIN, HEIGHT as f32 - MARGIN);

    for tick in 0..=Y_TICKS {
        let y = bottom - (bottom - top) * tick as f32 / Y_TICKS as f32;
        let loss =
            frame.min_loss + (frame.max_loss - frame.min_loss) * tick as f64 / Y_TICKS as f64;
        let label = format!("{:.2}", loss);
        draw_line_segment_mut(&mut image, (left, y), (right, y), GRID_COLOR);
        draw_line_segment_mut(&mut image, (left - TICK_LEN, y), (left, y), AXIS_COLOR);
        let label_x = left - TICK_LEN - 4.0 - text_width(&label, 1) as f32;
        draw_text(&mut image, label_x as i32, y as i32 - 4, 1, &label, AXIS_COLOR);
    }
    for epoch in 1..=frame.num_epochs {
        let x = frame.x(epoch);
        let label = epoch.to_string();
        draw_line_segment_mut(&mut image, (x, bottom), (x, bottom + TICK_LEN), AXIS_COLOR);
        let label_x = x - text_width(&label, 1) as f32 / 2.0;
        let label_y = bottom + TICK_LEN + 4.0;
        draw_text(&mut image, label_x as i32, label_y as i32, 1, &label, AXIS_COLOR);
    }
    draw_line_segment_mut(&mut image, (left, top), (left, bottom), AXIS_COLOR);
    draw_line_segment_mut(&mut image, (left, bottom), (right, bottom), AXIS_COLOR);

    let heading = title(log);
    let title_x = (WIDTH as i32 - text_width(&heading, TITLE_SCALE) as i32) / 2;
    draw_text(&mut image, title_x.max(0), 12, TITLE_SCALE, &heading, AXIS_COLOR);

    let x_label_x = (left + right) / 2.0 - text_width("Epoch", 1) as f32 / 2.0;
    draw_text(&mut image, x_label_x as i32, (bottom + 32.0) as i32, 1, "Epoch", AXIS_COLOR);
    draw_text(&mut image, 8, (top - 20.0) as i32, 1, "Loss", AXIS_COLOR);

    if !log.is_empty() {
        let records = log.records();
        let train: Vec<(usize, f64)> = records.iter().map(|r| (r.epoch, r.train_loss)).collect();
        let test: Vec<(usize, f64)> = records.iter().map(|r| (r.epoch, r.test_loss)).collect();
        draw_curve(&mut image, &frame, &train, TRAIN_COLOR);
        draw_curve(&mut image, &frame, &test, TEST_COLOR);
        draw_legend(&mut image, right, top);
    }

    image
}

/// Always written as PNG, whatever the extension of `path`
pub fn plot_losses(log: &TrainingLog, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    render_losses(log).save_with_format(path, ImageFormat::Png)?;

    tracing::info!("{} (plot saved to {})", title(log), path.display());

    Ok(())
}
