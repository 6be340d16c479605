//! Polygon outlines detected on a page.
//!
//! An [`Outline`] only refers to its page through a [`PageRef`]; it never owns
//! or borrows pixel data, so outline sets stay valid after the page image is dropped.

use geo::{Area, BoundingRect, Coord, Intersects, LineString, Polygon, Rect, RemoveRepeatedPoints};
use imageproc::point::Point;

use crate::raster::PageRef;

/// A simplified, closed polygon with integer pixel vertices.
#[derive(Debug, Clone, PartialEq)]
pub struct Outline {
    polygon: Polygon<f64>,
    area: f64,
    page: PageRef,
}

impl Outline {
    /// Builds an outline from its vertices. The ring is closed implicitly; repeated
    /// closing vertices and consecutive duplicates are dropped.
    pub fn new(vertices: &[Point<i32>], page: PageRef) -> Self {
        let coords = vertices
            .iter()
            .map(|point| Coord {
                x: f64::from(point.x),
                y: f64::from(point.y),
            })
            .collect();
        Self::from_polygon(Polygon::new(LineString::new(coords), vec![]), page)
    }

    /// Wraps a polygon, snapping its exterior to the pixel grid and dropping interiors.
    /// Vertices that coincide after snapping are merged.
    pub(crate) fn from_polygon(polygon: Polygon<f64>, page: PageRef) -> Self {
        let exterior = polygon
            .exterior()
            .coords()
            .map(|c| Coord {
                x: c.x.round(),
                y: c.y.round(),
            })
            .collect::<LineString<f64>>()
            .remove_repeated_points();
        let polygon = Polygon::new(exterior, vec![]);
        let area = polygon.unsigned_area();
        Self {
            polygon,
            area,
            page,
        }
    }

    pub fn polygon(&self) -> &Polygon<f64> {
        &self.polygon
    }

    pub fn area(&self) -> f64 {
        self.area
    }

    pub fn page(&self) -> PageRef {
        self.page
    }

    /// Distinct ring vertices, without the closing repeat.
    pub fn vertices(&self) -> Vec<Point<i32>> {
        let coords = &self.polygon.exterior().0;
        let open = coords.len().saturating_sub(1);
        coords[..open]
            .iter()
            .map(|c| Point::new(c.x as i32, c.y as i32))
            .collect()
    }

    pub fn vertex_count(&self) -> usize {
        self.polygon.exterior().0.len().saturating_sub(1)
    }

    pub fn bounding_box(&self) -> Option<Rect<f64>> {
        self.polygon.bounding_rect()
    }

    /// True when every vertex of `other` lies inside this outline or on its boundary.
    pub fn contains(&self, other: &Outline) -> bool {
        if self.vertex_count() < 3 || other.vertex_count() == 0 {
            return false;
        }
        other
            .polygon
            .exterior()
            .coords()
            .all(|coord| self.polygon.intersects(coord))
    }
}

/// Outlines detected on one page, in contour discovery order.
#[derive(Debug, Clone)]
pub struct OutlineSet {
    page: PageRef,
    outlines: Vec<Outline>,
}

impl OutlineSet {
    pub fn new(page: PageRef, outlines: Vec<Outline>) -> Self {
        Self { page, outlines }
    }

    pub fn empty(page: PageRef) -> Self {
        Self::new(page, Vec::new())
    }

    pub fn page(&self) -> PageRef {
        self.page
    }

    pub fn len(&self) -> usize {
        self.outlines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outlines.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Outline> {
        self.outlines.iter()
    }

    pub fn as_slice(&self) -> &[Outline] {
        &self.outlines
    }
}

impl<'a> IntoIterator for &'a OutlineSet {
    type Item = &'a Outline;
    type IntoIter = std::slice::Iter<'a, Outline>;

    fn into_iter(self) -> Self::IntoIter {
        self.outlines.iter()
    }
}

#[cfg(test)]
pub(crate) fn rect(x: i32, y: i32, width: i32, height: i32, page: PageRef) -> Outline {
    Outline::new(
        &[
            Point::new(x, y),
            Point::new(x + width, y),
            Point::new(x + width, y + height),
            Point::new(x, y + height),
        ],
        page,
    )
}
