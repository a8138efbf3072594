//! Block locators for chain synchronization.
//!
//! A locator lists main-chain heights from the tip back to genesis: dense
//! near the tip, then with gaps that roughly double, always ending at 0.
//! A peer walks the list and answers from the first height it shares.

use crate::constants::LOCATOR_DENSE_STEPS;

/// Heights to include in a locator for a chain whose tip is at `height`.
pub fn height_locator(height: u64) -> Vec<u64> {
    let mut heights = vec![height];
    let mut h = height;

    for _ in 0..LOCATOR_DENSE_STEPS {
        if h == 0 {
            return heights;
        }
        h -= 1;
        heights.push(h);
    }
    if h == 0 {
        return heights;
    }

    let mut step = 2;
    loop {
        if h <= step {
            heights.push(0);
            return heights;
        }
        h -= step;
        heights.push(h);
        step = step * 2 - 1;
    }
}
