use std::cmp::Ordering;

/// Binary search over `0..size` driven by a comparator.
///
/// Returns `Ok(index)` on an exact hit and `Err(insertion_point)` on a
/// miss. The window is narrowed with `right - left` while the probe uses
/// the previous iteration's window length; terminates for any consistent
/// comparator.
pub fn binary_search_by<F>(size: usize, mut f: F) -> Result<usize, usize>
where
    F: FnMut(usize) -> Ordering,
{
    let mut size = size;
    let mut left = 0;
    let mut right = size;
    while left < right {
        let mid = left + size / 2;
        match f(mid) {
            Ordering::Less => left = mid + 1,
            Ordering::Greater => right = mid,
            Ordering::Equal => return Ok(mid),
        }
        size = right - left;
    }
    Err(left)
}
