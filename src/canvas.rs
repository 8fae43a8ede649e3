// Software compositing for the shared-memory path
// Writes premultiplied ARGB8888 (BGRA byte order) frames

use crate::image_loader::ImageData;

/// Largest shm buffer the CPU path will allocate (64MB to avoid Wayland buffer issues)
pub const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Size in bytes of one ARGB8888 frame
pub const fn frame_len(width: u32, height: u32) -> usize {
    width as usize * 4 * height as usize
}

/// Window fill shown while no screenshot is displayed (B, G, R)
pub const BACKGROUND: [u8; 3] = [0x20, 0x20, 0x20];

/// Convert a 0.0..=1.0 opacity into an 8-bit alpha
pub fn opacity_to_alpha(opacity: f32) -> u8 {
    (opacity.clamp(0.0, 1.0) * 255.0).round() as u8
}

#[inline]
fn mul_div_255(a: u32, b: u32) -> u32 {
    (a * b + 127) / 255
}

/// Fill the whole canvas with the background colour
pub fn clear(canvas: &mut [u8], opacity: f32) {
    let alpha = opacity_to_alpha(opacity) as u32;
    let px = [
        mul_div_255(BACKGROUND[0] as u32, alpha) as u8,
        mul_div_255(BACKGROUND[1] as u32, alpha) as u8,
        mul_div_255(BACKGROUND[2] as u32, alpha) as u8,
        alpha as u8,
    ];
    for pixel in canvas.chunks_exact_mut(4) {
        pixel.copy_from_slice(&px);
    }
}

/// Draw `image` over the background, stretched to the canvas with
/// nearest-neighbour sampling when the sizes differ.
pub fn compose(canvas: &mut [u8], width: u32, height: u32, image: Option<&ImageData>, opacity: f32) {
    let Some(image) = image.filter(|img| img.width > 0 && img.height > 0) else {
        clear(canvas, opacity);
        return;
    };
    if width == 0 || height == 0 {
        return;
    }

    let alpha = opacity_to_alpha(opacity) as u32;
    let img_stride = image.width as usize * 4;

    // Pre-compute scale factors as fixed-point for faster integer math
    let scale_x_fp = ((image.width as u64) << 16) / width as u64;
    let scale_y_fp = ((image.height as u64) << 16) / height as u64;

    let x_lut: Vec<usize> = (0..width)
        .map(|x| {
            let src_x = ((x as u64 * scale_x_fp) >> 16) as u32;
            src_x.min(image.width - 1) as usize
        })
        .collect();

    for y in 0..height {
        let src_y = (((y as u64) * scale_y_fp) >> 16) as u32;
        let src_row = src_y.min(image.height - 1) as usize * img_stride;
        let dst_row = y as usize * width as usize * 4;

        for (x, &src_x) in x_lut.iter().enumerate() {
            let src_idx = src_row + src_x * 4;
            let dst_idx = dst_row + x * 4;
            let (Some(src), Some(dst)) = (
                image.bgra_data.get(src_idx..src_idx + 4),
                canvas.get_mut(dst_idx..dst_idx + 4),
            ) else {
                continue;
            };

            // Source over background, then scaled by window opacity
            let src_alpha = src[3] as u32;
            for c in 0..3 {
                let over = mul_div_255(src[c] as u32, src_alpha)
                    + mul_div_255(BACKGROUND[c] as u32, 255 - src_alpha);
                dst[c] = mul_div_255(over.min(255), alpha) as u8;
            }
            dst[3] = alpha as u8;
        }
    }
}
