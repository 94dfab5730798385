use image::GrayImage;
use imageproc::contours::{find_contours, BorderType};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::morphology::dilate;
use log::debug;

use crate::models::StampRegion;
use crate::processing::image::ImageProcessor;

const CANNY_LOW: f32 = 50.0;
const CANNY_HIGH: f32 = 150.0;

/// Size and shape window a stamp outline must fall in, bounds inclusive.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionFilter {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub min_aspect: f32,
    pub max_aspect: f32,
}

impl Default for RegionFilter {
    fn default() -> Self {
        RegionFilter {
            min_width: 50,
            max_width: 300,
            min_height: 30,
            max_height: 150,
            min_aspect: 1.5,
            max_aspect: 5.0,
        }
    }
}

impl RegionFilter {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        if height == 0 {
            return false;
        }
        let aspect = width as f32 / height as f32;
        (self.min_width..=self.max_width).contains(&width)
            && (self.min_height..=self.max_height).contains(&height)
            && aspect >= self.min_aspect
            && aspect <= self.max_aspect
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RegionDetector {
    pub filter: RegionFilter,
}

impl RegionDetector {
    /// Finds rectangular outlines that look like stamps, top to bottom then left to right.
    /// A page with no plausible outline yields an empty list.
    pub fn detect(&self, page: &GrayImage) -> Vec<StampRegion> {
        let edges = canny(page, CANNY_LOW, CANNY_HIGH);
        // Bridge small gaps so a stamp border closes into one contour.
        let joined = dilate(&edges, Norm::LInf, 1);

        let mut boxes: Vec<(u32, u32, u32, u32)> = find_contours::<u32>(&joined)
            .into_iter()
            .filter(|contour| contour.border_type == BorderType::Outer && contour.parent.is_none())
            .filter_map(|contour| {
                let min_x = contour.points.iter().map(|p| p.x).min()?;
                let max_x = contour.points.iter().map(|p| p.x).max()?;
                let min_y = contour.points.iter().map(|p| p.y).min()?;
                let max_y = contour.points.iter().map(|p| p.y).max()?;
                Some((min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
            })
            .filter(|(_, _, w, h)| self.filter.accepts(*w, *h))
            .collect();

        boxes.sort_by_key(|(x, y, _, _)| (*y, *x));
        debug!("Detected {} candidate stamp regions", boxes.len());

        boxes
            .into_iter()
            .map(|(x, y, width, height)| StampRegion {
                x,
                y,
                width,
                height,
                pixels: ImageProcessor::crop(page, x, y, width, height),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use imageproc::drawing::draw_filled_rect_mut;
    use imageproc::rect::Rect;

    fn page_with_rect(width: u32, height: u32) -> GrayImage {
        let mut page = GrayImage::from_pixel(400, 300, Luma([255u8]));
        draw_filled_rect_mut(&mut page, Rect::at(60, 80).of_size(width, height), Luma([0u8]));
        page
    }

    #[test]
    fn test_filter_bounds_are_inclusive() {
        let filter = RegionFilter::default();
        assert!(filter.accepts(50, 30));
        assert!(filter.accepts(300, 150));
        assert!(filter.accepts(150, 30));
        assert!(!filter.accepts(49, 30));
        assert!(!filter.accepts(100, 100)); // square
        assert!(!filter.accepts(300, 40)); // 7.5:1
        assert!(!filter.accepts(100, 0));
    }

    #[test]
    fn test_detects_stamp_shaped_rectangle() {
        let regions = RegionDetector::default().detect(&page_with_rect(120, 50));
        assert_eq!(regions.len(), 1);

        let region = &regions[0];
        assert!((115..=130).contains(&region.width), "width {}", region.width);
        assert!((45..=60).contains(&region.height), "height {}", region.height);
        assert_eq!(region.pixels.dimensions(), (region.width, region.height));
    }

    #[test]
    fn test_ignores_small_marks() {
        assert!(RegionDetector::default().detect(&page_with_rect(40, 20)).is_empty());
    }

    #[test]
    fn test_blank_page_has_no_regions() {
        let page = GrayImage::from_pixel(400, 300, Luma([255u8]));
        assert!(RegionDetector::default().detect(&page).is_empty());
    }
}
