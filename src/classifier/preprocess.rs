use image::imageops::FilterType;
use image::RgbImage;
use ndarray::Array4;

use super::{ClassifierError, ClassifierOptions, InputTensor, InputType, Layout};

/// Decodes any format the `image` crate recognises into RGB8.
pub fn decode(bytes: &[u8]) -> Result<RgbImage, ClassifierError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Stretches to a `size`x`size` square with nearest-neighbour sampling.
/// Aspect ratio is not preserved.
pub fn resize(image: &RgbImage, size: u32) -> RgbImage {
    image::imageops::resize(image, size, size, FilterType::Nearest)
}

pub fn prepare(image: &RgbImage, options: &ClassifierOptions) -> InputTensor {
    let resized = resize(image, options.input_size);
    to_tensor(&resized, options.input_type, options.layout)
}

pub fn to_tensor(image: &RgbImage, input_type: InputType, layout: Layout) -> InputTensor {
    match input_type {
        InputType::U8 => InputTensor::U8(fill(image, layout, |v| v)),
        InputType::F32 => InputTensor::F32(fill(image, layout, |v| f32::from(v) / 255.0)),
    }
}

fn fill<T: Copy + Default>(image: &RgbImage, layout: Layout, cast: impl Fn(u8) -> T) -> Array4<T> {
    let (width, height) = (image.width() as usize, image.height() as usize);
    let mut tensor = match layout {
        Layout::Nhwc => Array4::default((1, height, width, 3)),
        Layout::Nchw => Array4::default((1, 3, height, width)),
    };

    for (x, y, pixel) in image.enumerate_pixels() {
        let (x, y) = (x as usize, y as usize);
        for c in 0..3 {
            let value = cast(pixel[c]);
            match layout {
                Layout::Nhwc => tensor[[0, y, x, c]] = value,
                Layout::Nchw => tensor[[0, c, y, x]] = value,
            }
        }
    }
    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::testing::png_bytes;
    use image::Rgb;

    #[test]
    fn stretches_to_a_square_without_letterboxing() {
        let wide = RgbImage::from_pixel(400, 100, Rgb([10, 20, 30]));
        let resized = resize(&wide, 224);
        assert_eq!(resized.dimensions(), (224, 224));
        // no padding: every pixel comes from the source
        assert!(resized.pixels().all(|p| *p == Rgb([10, 20, 30])));
    }

    #[test]
    fn nearest_neighbour_keeps_source_values() {
        let mut image = RgbImage::new(2, 1);
        image.put_pixel(0, 0, Rgb([255, 0, 0]));
        image.put_pixel(1, 0, Rgb([0, 0, 255]));

        let resized = resize(&image, 4);
        for pixel in resized.pixels() {
            assert!(*pixel == Rgb([255, 0, 0]) || *pixel == Rgb([0, 0, 255]));
        }
    }

    #[test]
    fn u8_nhwc_keeps_raw_channel_values() {
        let mut image = RgbImage::new(2, 2);
        image.put_pixel(1, 0, Rgb([7, 8, 9]));

        match to_tensor(&image, InputType::U8, Layout::Nhwc) {
            InputTensor::U8(t) => {
                assert_eq!(t.shape(), &[1, 2, 2, 3]);
                assert_eq!(t[[0, 0, 1, 0]], 7);
                assert_eq!(t[[0, 0, 1, 2]], 9);
            }
            other => panic!("unexpected tensor {other:?}"),
        }
    }

    #[test]
    fn f32_nchw_scales_to_unit_range() {
        let image = RgbImage::from_pixel(3, 2, Rgb([255, 0, 51]));

        match to_tensor(&image, InputType::F32, Layout::Nchw) {
            InputTensor::F32(t) => {
                assert_eq!(t.shape(), &[1, 3, 2, 3]);
                assert_eq!(t[[0, 0, 1, 2]], 1.0);
                assert_eq!(t[[0, 1, 0, 0]], 0.0);
                assert!((t[[0, 2, 0, 0]] - 0.2).abs() < 1e-6);
            }
            other => panic!("unexpected tensor {other:?}"),
        }
    }

    #[test]
    fn prepare_matches_configured_shape() {
        let options = ClassifierOptions::default();
        let image = decode(&png_bytes(50, 80)).unwrap();
        let input = prepare(&image, &options);
        assert_eq!(input.shape(), &options.input_shape());
    }
}
