//! 8-bit pixel operations on `(height, width, channels)` arrays.
//!
//! Every operation works in integer fixed point and rounds half up, so the
//! output only depends on the input pixels:
//!
//! * [`crop_rows`] – keep a horizontal band.
//! * [`rgb_to_yuv`] – analog YUV with a 14-bit fixed-point matrix.
//! * [`gaussian_blur_3x3`] – `[1, 2, 1] / 4` kernel on both axes,
//!   reflect-101 borders.
//! * [`resize_bilinear`] – half-pixel-centred bilinear sampling with 8-bit
//!   fractional weights.

use ndarray::{Array3, ArrayView3, Axis, s};

// ────────────────────────────────────────────────────────────────────────────
// Crop
// ────────────────────────────────────────────────────────────────────────────

/// Return rows `[top, bottom)` of `image`.
///
/// The caller guarantees `bottom <= image.dim().0`.
pub fn crop_rows(image: ArrayView3<'_, u8>, top: usize, bottom: usize) -> Array3<u8> {
    image.slice(s![top..bottom, .., ..]).to_owned()
}

// ────────────────────────────────────────────────────────────────────────────
// Colour conversion
// ────────────────────────────────────────────────────────────────────────────

const YUV_SHIFT: u32 = 14;
const YUV_ROUND: i32 = 1 << (YUV_SHIFT - 1);
const CHROMA_DELTA: i32 = 128 << YUV_SHIFT;
// 0.299, 0.587, 0.114 scaled by 2^14; they sum to exactly 2^14.
const R2Y: i32 = 4899;
const G2Y: i32 = 9617;
const B2Y: i32 = 1868;
// 0.492 and 0.877 scaled by 2^14.
const B2U: i32 = 8061;
const R2V: i32 = 14369;

/// Convert every RGB pixel of `image` to YUV in place.
///
/// `Y = .299R + .587G + .114B`, `U = .492(B - Y) + 128`,
/// `V = .877(R - Y) + 128`, each rounded and saturated to `0..=255`.
pub fn rgb_to_yuv(image: &mut Array3<u8>) {
    for mut px in image.lanes_mut(Axis(2)) {
        let (r, g, b) = (i32::from(px[0]), i32::from(px[1]), i32::from(px[2]));
        let y = (r * R2Y + g * G2Y + b * B2Y + YUV_ROUND) >> YUV_SHIFT;
        let u = ((b - y) * B2U + CHROMA_DELTA + YUV_ROUND) >> YUV_SHIFT;
        let v = ((r - y) * R2V + CHROMA_DELTA + YUV_ROUND) >> YUV_SHIFT;
        px[0] = saturate(y);
        px[1] = saturate(u);
        px[2] = saturate(v);
    }
}

fn saturate(value: i32) -> u8 {
    value.clamp(0, 255) as u8
}

// ────────────────────────────────────────────────────────────────────────────
// Gaussian blur
// ────────────────────────────────────────────────────────────────────────────

/// 3-tap Gaussian weights for a zero sigma, in units of 1/4.
const GAUSS_3: [u32; 3] = [1, 2, 1];

/// Apply a 3×3 Gaussian blur channel by channel.
pub fn gaussian_blur_3x3(image: ArrayView3<'_, u8>) -> Array3<u8> {
    let (height, width, channels) = image.dim();
    let mut out = Array3::<u8>::zeros((height, width, channels));

    for y in 0..height {
        let rows = neighbours(y, height);
        for x in 0..width {
            let cols = neighbours(x, width);
            for c in 0..channels {
                let mut acc = 0u32;
                for (wy, &yy) in GAUSS_3.iter().zip(rows.iter()) {
                    for (wx, &xx) in GAUSS_3.iter().zip(cols.iter()) {
                        acc += wy * wx * u32::from(image[[yy, xx, c]]);
                    }
                }
                // Kernel weights sum to 16.
                out[[y, x, c]] = ((acc + 8) >> 4) as u8;
            }
        }
    }
    out
}

fn neighbours(i: usize, len: usize) -> [usize; 3] {
    let i = i as isize;
    [reflect101(i - 1, len), reflect101(i, len), reflect101(i + 1, len)]
}

/// Map an out-of-range index back inside `0..len` mirroring around the edge
/// pixel without repeating it (`gfedcb|abcdefgh|gfedcba`).
fn reflect101(i: isize, len: usize) -> usize {
    if len == 1 {
        return 0;
    }
    let len = len as isize;
    let mirrored = if i < 0 {
        -i
    } else if i >= len {
        2 * len - i - 2
    } else {
        i
    };
    mirrored as usize
}

// ────────────────────────────────────────────────────────────────────────────
// Resize
// ────────────────────────────────────────────────────────────────────────────

const RESIZE_COEF_BITS: u32 = 8;
const RESIZE_COEF_ONE: u32 = 1 << RESIZE_COEF_BITS;

/// Source taps and fixed-point weights for one output coordinate.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Taps {
    lo: usize,
    hi: usize,
    w_lo: u32,
    w_hi: u32,
}

fn taps(dst: usize, src_len: usize, dst_len: usize) -> Taps {
    let scale = src_len as f64 / dst_len as f64;
    let pos = (dst as f64 + 0.5) * scale - 0.5;
    let mut lo = pos.floor();
    let mut frac = pos - lo;
    if lo < 0.0 {
        lo = 0.0;
        frac = 0.0;
    }
    let mut lo = lo as usize;
    if lo >= src_len - 1 {
        lo = src_len - 1;
        frac = 0.0;
    }
    let w_hi = (frac * f64::from(RESIZE_COEF_ONE)).round() as u32;
    Taps {
        lo,
        hi: (lo + 1).min(src_len - 1),
        w_lo: RESIZE_COEF_ONE - w_hi,
        w_hi,
    }
}

/// Resize `image` to `out_height × out_width` with bilinear interpolation.
///
/// Both source dimensions must be non-zero.
pub fn resize_bilinear(image: ArrayView3<'_, u8>, out_height: usize, out_width: usize) -> Array3<u8> {
    let (height, width, channels) = image.dim();
    let row_taps: Vec<Taps> = (0..out_height).map(|y| taps(y, height, out_height)).collect();
    let col_taps: Vec<Taps> = (0..out_width).map(|x| taps(x, width, out_width)).collect();

    let round = 1u32 << (2 * RESIZE_COEF_BITS - 1);
    let mut out = Array3::<u8>::zeros((out_height, out_width, channels));
    for (oy, ty) in row_taps.iter().enumerate() {
        for (ox, tx) in col_taps.iter().enumerate() {
            for c in 0..channels {
                let px = |y: usize, x: usize| u32::from(image[[y, x, c]]);
                let top = px(ty.lo, tx.lo) * tx.w_lo + px(ty.lo, tx.hi) * tx.w_hi;
                let bottom = px(ty.hi, tx.lo) * tx.w_lo + px(ty.hi, tx.hi) * tx.w_hi;
                let value = top * ty.w_lo + bottom * ty.w_hi;
                out[[oy, ox, c]] = ((value + round) >> (2 * RESIZE_COEF_BITS)) as u8;
            }
        }
    }
    out
}
