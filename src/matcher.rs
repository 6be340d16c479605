//! Containment matching between plot outlines and master outlines.
//!
//! Masters are tried in detection order and the first one containing the plot
//! outline wins. Overlapping masters are not disambiguated, so the result depends
//! on contour discovery order whenever more than one master contains a plot.

use tracing::instrument;

use crate::geometry::{Outline, OutlineSet};

/// A plot outline together with the master outline that contains it.
#[derive(Debug, Clone, Copy)]
pub struct Containment<'a> {
    pub plot: &'a Outline,
    pub master: &'a Outline,
}

/// The first master outline, in detection order, that contains `plot`.
pub fn find_container<'a>(plot: &Outline, masters: &'a OutlineSet) -> Option<&'a Outline> {
    masters.iter().find(|master| master.contains(plot))
}

/// Every plot outline with a containing master, in plot detection order.
/// Plot outlines without a container are left out.
#[instrument(level = "debug", skip_all, fields(plots = plots.len(), masters = masters.len()))]
pub fn match_all<'a>(plots: &'a OutlineSet, masters: &'a OutlineSet) -> Vec<Containment<'a>> {
    let matches = plots
        .iter()
        .filter_map(|plot| {
            let master = find_container(plot, masters);
            if master.is_none() {
                log::trace!("No master contains plot outline {:?}", plot.bounding_box());
            }
            master.map(|master| Containment { plot, master })
        })
        .collect::<Vec<_>>();
    log::debug!(
        "{} of {} plot outlines matched",
        matches.len(),
        plots.len()
    );
    matches
}
