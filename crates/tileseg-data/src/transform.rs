//! Paired image/mask transforms.
//!
//! Geometry is decided once per pair and applied to both members, so a crop
//! can never misalign the labels. Colour jitter touches the image only.

use image::{DynamicImage, ImageBuffer, Luma, Pixel, Rgb32FImage};
use rand::{seq::SliceRandom, Rng};

/// Side length of the square training and validation crops.
pub const DEFAULT_CROP_SIZE: u32 = 400;

/// Single channel float mask.
pub type Luma32FImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Image and optional mask after a transform, as floats in `[0, 1]`.
#[derive(Debug, Clone)]
pub struct TransformedPair {
    pub image: Rgb32FImage,
    pub mask: Option<Luma32FImage>,
}

impl TransformedPair {
    /// Plain conversion with no geometry or colour change.
    pub fn convert(image: &DynamicImage, mask: Option<&DynamicImage>) -> Self {
        Self {
            image: image.to_rgb32f(),
            mask: mask.map(DynamicImage::to_luma32f),
        }
    }
}

/// The individual colour operations, applied in a random order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JitterOp {
    Brightness,
    Contrast,
    Saturation,
    Hue,
}

/// Random brightness, contrast, saturation and hue changes.
///
/// Each field is the maximum relative change. Brightness, contrast and
/// saturation factors are drawn from `[max(0, 1 - v), 1 + v]` and the hue
/// shift from `[-v, v]` (in turns). Zero disables the operation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ColorJitter {
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub hue: f32,
}

impl Default for ColorJitter {
    fn default() -> Self {
        Self::uniform(0.25)
    }
}

impl ColorJitter {
    /// The same strength for all four operations.
    pub const fn uniform(strength: f32) -> Self {
        Self {
            brightness: strength,
            contrast: strength,
            saturation: strength,
            hue: strength,
        }
    }

    /// A jitter that leaves images untouched.
    pub const fn none() -> Self {
        Self::uniform(0.0)
    }

    /// Draw the order and factors for one image.
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> JitterParams {
        let mut order = [
            JitterOp::Brightness,
            JitterOp::Contrast,
            JitterOp::Saturation,
            JitterOp::Hue,
        ];
        order.shuffle(rng);

        let mut factor = |v: f32| (v > 0.0).then(|| rng.random_range((1.0 - v).max(0.0)..=1.0 + v));
        let brightness = factor(self.brightness);
        let contrast = factor(self.contrast);
        let saturation = factor(self.saturation);
        let hue = (self.hue > 0.0).then(|| {
            let v = self.hue.min(0.5);
            rng.random_range(-v..=v)
        });

        JitterParams {
            order,
            brightness,
            contrast,
            saturation,
            hue,
        }
    }
}

/// One concrete draw of [`ColorJitter`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JitterParams {
    pub order: [JitterOp; 4],
    pub brightness: Option<f32>,
    pub contrast: Option<f32>,
    pub saturation: Option<f32>,
    pub hue: Option<f32>,
}

impl JitterParams {
    pub fn apply(&self, image: &mut Rgb32FImage) {
        for op in self.order {
            match op {
                JitterOp::Brightness => {
                    if let Some(f) = self.brightness {
                        map_channels(image, |c, _| c * f);
                    }
                }
                JitterOp::Contrast => {
                    if let Some(f) = self.contrast {
                        let mean = mean_gray(image);
                        map_channels(image, |c, _| f * c + (1.0 - f) * mean);
                    }
                }
                JitterOp::Saturation => {
                    if let Some(f) = self.saturation {
                        map_channels(image, |c, gray| f * c + (1.0 - f) * gray);
                    }
                }
                JitterOp::Hue => {
                    if let Some(shift) = self.hue {
                        for px in image.pixels_mut() {
                            let [h, s, v] = rgb_to_hsv(px.0);
                            px.0 = hsv_to_rgb([(h + shift).rem_euclid(1.0), s, v]);
                        }
                    }
                }
            }
        }
    }
}

fn gray([r, g, b]: [f32; 3]) -> f32 {
    0.2989 * r + 0.587 * g + 0.114 * b
}

fn mean_gray(image: &Rgb32FImage) -> f32 {
    let count = (image.width() as usize * image.height() as usize).max(1);
    image.pixels().map(|px| gray(px.0)).sum::<f32>() / count as f32
}

fn map_channels(image: &mut Rgb32FImage, f: impl Fn(f32, f32) -> f32) {
    for px in image.pixels_mut() {
        let g = gray(px.0);
        for c in &mut px.0 {
            *c = f(*c, g).clamp(0.0, 1.0);
        }
    }
}

fn rgb_to_hsv([r, g, b]: [f32; 3]) -> [f32; 3] {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let hue = if delta <= f32::EPSILON {
        0.0
    } else if max == r {
        ((g - b) / delta).rem_euclid(6.0) / 6.0
    } else if max == g {
        ((b - r) / delta + 2.0) / 6.0
    } else {
        ((r - g) / delta + 4.0) / 6.0
    };
    let saturation = if max <= f32::EPSILON { 0.0 } else { delta / max };
    [hue, saturation, max]
}

fn hsv_to_rgb([h, s, v]: [f32; 3]) -> [f32; 3] {
    let h6 = h.rem_euclid(1.0) * 6.0;
    let sector = h6.floor();
    let f = h6 - sector;
    let p = v * (1.0 - s);
    let q = v * (1.0 - s * f);
    let t = v * (1.0 - s * (1.0 - f));

    match sector as u8 % 6 {
        0 => [v, t, p],
        1 => [q, v, p],
        2 => [p, v, t],
        3 => [p, q, v],
        4 => [t, p, v],
        _ => [v, p, q],
    }
}

/// Training augmentation: reflect pad, random crop, colour jitter.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainTransform {
    pub crop_size: u32,
    /// Reflect padding added on every side before cropping.
    pub padding: u32,
    pub jitter: ColorJitter,
}

impl Default for TrainTransform {
    fn default() -> Self {
        Self {
            crop_size: DEFAULT_CROP_SIZE,
            padding: 0,
            jitter: ColorJitter::default(),
        }
    }
}

/// Deterministic center crop for validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValTransform {
    pub crop_size: u32,
}

impl Default for ValTransform {
    fn default() -> Self {
        Self {
            crop_size: DEFAULT_CROP_SIZE,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PairedTransform {
    Train(TrainTransform),
    Val(ValTransform),
}

impl PairedTransform {
    /// Transform a pair. All randomness is drawn from `rng`.
    pub fn apply<R: Rng + ?Sized>(
        &self,
        image: &DynamicImage,
        mask: Option<&DynamicImage>,
        rng: &mut R,
    ) -> TransformedPair {
        let TransformedPair { image, mask } = TransformedPair::convert(image, mask);

        match self {
            Self::Train(t) => {
                let image = reflect_pad(&image, t.padding);
                let mask = mask.map(|m| reflect_pad(&m, t.padding));

                let (width, height) = image.dimensions();
                let top = rng.random_range(0..=height.saturating_sub(t.crop_size));
                let left = rng.random_range(0..=width.saturating_sub(t.crop_size));

                let mut image = crop(&image, i64::from(left), i64::from(top), t.crop_size);
                let mask = mask.map(|m| crop(&m, i64::from(left), i64::from(top), t.crop_size));

                t.jitter.sample(rng).apply(&mut image);
                TransformedPair { image, mask }
            }
            Self::Val(t) => {
                let (width, height) = image.dimensions();
                let left = center_origin(width, t.crop_size);
                let top = center_origin(height, t.crop_size);
                TransformedPair {
                    image: crop(&image, left, top, t.crop_size),
                    mask: mask.map(|m| crop(&m, left, top, t.crop_size)),
                }
            }
        }
    }
}

/// Half-way offsets round to even, so an odd surplus of one pixel keeps the
/// origin at zero.
fn center_origin(dim: u32, size: u32) -> i64 {
    ((f64::from(dim) - f64::from(size)) / 2.0).round_ties_even() as i64
}

fn reflect(i: u32, border: u32, len: u32) -> u32 {
    let n = i64::from(len);
    let mut idx = i64::from(i) - i64::from(border);
    if idx < 0 {
        idx = -idx;
    }
    if idx >= n {
        idx = 2 * (n - 1) - idx;
    }
    idx.clamp(0, n - 1) as u32
}

/// Mirror the buffer outward by `border` pixels without repeating the edge.
pub fn reflect_pad<P: Pixel>(
    buf: &ImageBuffer<P, Vec<P::Subpixel>>,
    border: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let (w, h) = buf.dimensions();
    if border == 0 || w == 0 || h == 0 {
        return buf.clone();
    }
    ImageBuffer::from_fn(w + 2 * border, h + 2 * border, |x, y| {
        *buf.get_pixel(reflect(x, border, w), reflect(y, border, h))
    })
}

/// Square crop at `(left, top)`. Pixels outside the source are zero.
pub fn crop<P: Pixel>(
    buf: &ImageBuffer<P, Vec<P::Subpixel>>,
    left: i64,
    top: i64,
    size: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>> {
    let (w, h) = buf.dimensions();
    let mut out = ImageBuffer::new(size, size);
    for (x, y, px) in out.enumerate_pixels_mut() {
        let sx = left + i64::from(x);
        let sy = top + i64::from(y);
        if (0..i64::from(w)).contains(&sx) && (0..i64::from(h)).contains(&sy) {
            *px = *buf.get_pixel(sx as u32, sy as u32);
        }
    }
    out
}
