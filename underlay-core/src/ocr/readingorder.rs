//! Orders detected lines into a human reading order.
//!
//! Lines are grouped into blocks by a greedy local loop: pick the line a
//! reader would start at, then keep following the current column downward,
//! falling back to close-vertical-neighbor continuation, and close the
//! block as soon as some other line has a stronger claim to come first.
//!
//! The `needs_to_come_before` relation is irreflexive but NOT a strict
//! partial order: three lines can form a cycle (b before a, c before b, a
//! before c). Nothing here may rely on its transitive closure being
//! acyclic, which is also why a topological sort would be wrong; the greedy
//! loop terminates regardless.

use itertools::Itertools;

use crate::geometry::{Point, Rect};
use crate::ocr::textline::TextLine;

/// Maximum corner-to-corner distance for the continuation fallback.
const CONTINUATION_DISTANCE: f32 = 20.0;
/// Horizontal slack around a column, as a fraction of its width.
const COLUMN_PADDING_RATIO: f32 = 0.1;
/// Minimum horizontal overlap for a line to extend a column, as a fraction
/// of the line's width.
const COLUMN_OVERLAP_RATIO: f32 = 0.8;

#[derive(Debug)]
pub struct ReadingOrderBlock {
    pub lines: Vec<TextLine>,
    pub rect: Rect,
    pub sort_key: f32,
}

impl ReadingOrderBlock {
    fn new(lines: Vec<TextLine>) -> Self {
        let rect = lines
            .iter()
            .fold(Rect::default(), |acc, line| acc.union(&line.rect));
        let sort_key = lines
            .iter()
            .map(|line| line.rect.x0 + line.rect.y0)
            .fold(f32::INFINITY, f32::min);
        ReadingOrderBlock {
            lines,
            rect,
            sort_key,
        }
    }

    pub fn text(&self) -> String {
        self.lines.iter().map(|line| line.text.as_str()).join(" ")
    }
}

/// Pairwise ordering geometry of a single line.
#[derive(Debug, Clone, Copy)]
pub struct ReadingOrderGeometry {
    pub rect: Rect,
}

impl ReadingOrderGeometry {
    pub fn new(rect: Rect) -> Self {
        Self { rect }
    }

    /// y dominates: a line further down has to be much further left to
    /// win the starting position.
    fn sort_key(&self) -> f32 {
        self.rect.x0 + 2.0 * self.rect.y0
    }

    /// Whether this line has to be read before `other`.
    ///
    /// Holds when this line's center is up-and-left of the other's, when it
    /// sits strictly left of the other's whole rect without being entirely
    /// below it, or when it sits strictly above the other's whole rect
    /// without being entirely to its right.
    pub fn needs_to_come_before(&self, other: &ReadingOrderGeometry) -> bool {
        let center = self.rect.center();
        let other_center = other.rect.center();

        if (center.x < other_center.x && center.y <= other_center.y)
            || (center.x <= other_center.x && center.y < other_center.y)
        {
            return true;
        }
        if center.x < other.rect.x0 && (center.y < other.rect.y1 || self.rect.y0 < other_center.y)
        {
            return true;
        }
        if center.y < other.rect.y0 && (center.x < other.rect.x1 || self.rect.x0 < other_center.x)
        {
            return true;
        }
        false
    }
}

/// A vertical reading channel tracked while a block grows downward.
#[derive(Debug, Clone, Copy)]
struct Column {
    rect: Rect,
    bottom_of_first_line: f32,
    top_of_last_line: f32,
}

impl Column {
    fn from_line(rect: Rect) -> Self {
        Column {
            rect,
            bottom_of_first_line: rect.y1,
            top_of_last_line: rect.y0,
        }
    }

    /// Expands the column upward by an earlier line.
    fn prepend(&self, rect: &Rect) -> Self {
        Column {
            rect: self.rect.union(rect),
            bottom_of_first_line: rect.y1,
            top_of_last_line: self.top_of_last_line,
        }
    }

    /// An unassigned line interrupts the column when it cuts through its
    /// interior vertical span.
    fn interrupted_by(&self, rect: &Rect) -> bool {
        let center_y = rect.center().y;
        rect.intersects(&self.rect)
            && center_y > self.bottom_of_first_line
            && center_y < self.top_of_last_line
    }

    /// Extension below the column with sufficient horizontal agreement,
    /// measured against the column's width.
    fn accurately_extended_by(&self, rect: &Rect) -> bool {
        rect.center().y > self.top_of_last_line
            && rect.x_overlap(&self.rect) >= COLUMN_OVERLAP_RATIO * self.rect.width()
    }

    /// Whether `rect` is the natural next line of this column.
    fn can_be_extended_by(&self, rect: &Rect) -> bool {
        let padding = COLUMN_PADDING_RATIO * self.rect.width();
        rect.center().y > self.top_of_last_line
            && rect.y0 < self.rect.y1 + self.rect.height()
            && rect.x0 >= self.rect.x0 - padding
            && rect.x1 <= self.rect.x1 + padding
            && rect.x_overlap(&self.rect) >= COLUMN_OVERLAP_RATIO * rect.width()
    }
}

fn geo(line: &TextLine) -> ReadingOrderGeometry {
    ReadingOrderGeometry::new(line.rect)
}

/// Minimum of the three vertical corner-to-corner distances (left, center,
/// right) from the bottom of `current` to the top of `candidate`. Checking
/// all three keeps right-aligned and centered continuations reachable.
fn distance_after(current: &TextLine, candidate: &TextLine) -> f32 {
    let a = current.rect;
    let b = candidate.rect;
    let pairs = [
        (a.bottom_left(), b.top_left()),
        (
            Point::new((a.x0 + a.x1) / 2.0, a.y1),
            Point::new((b.x0 + b.x1) / 2.0, b.y0),
        ),
        (a.bottom_right(), b.top_right()),
    ];
    pairs
        .iter()
        .map(|(from, to)| from.distance_to(*to))
        .fold(f32::INFINITY, f32::min)
}

/// The line a reader would start the next block at: smallest sort key,
/// then repeatedly replaced by whichever remaining candidate has to come
/// before it, until no candidate precedes the pick. The candidate set
/// shrinks every round, so cycles in the relation cannot loop this.
fn find_block_start(lines: &[TextLine]) -> usize {
    let mut candidates: Vec<usize> = (0..lines.len()).collect();
    loop {
        let current = match candidates
            .iter()
            .copied()
            .min_by(|&a, &b| {
                geo(&lines[a])
                    .sort_key()
                    .total_cmp(&geo(&lines[b]).sort_key())
            }) {
            Some(index) => index,
            None => return 0,
        };
        let predecessors: Vec<usize> = candidates
            .iter()
            .copied()
            .filter(|&i| i != current && geo(&lines[i]).needs_to_come_before(&geo(&lines[current])))
            .collect();
        if predecessors.is_empty() {
            return current;
        }
        candidates = predecessors;
    }
}

/// Rebuilds the current column from the block's tail: start at the last
/// accepted line and prepend earlier block lines while doing so neither
/// interrupts an unassigned line nor costs the column any of its potential
/// extensions.
fn current_column(block: &[TextLine], remaining: &[TextLine]) -> Column {
    let last = match block.last() {
        Some(line) => line,
        None => return Column::from_line(Rect::default()),
    };
    let mut column = Column::from_line(last.rect);
    for line in block[..block.len() - 1].iter().rev() {
        let expanded = column.prepend(&line.rect);
        if remaining
            .iter()
            .any(|other| expanded.interrupted_by(&other.rect))
        {
            break;
        }
        let extenders = |column: &Column| {
            remaining
                .iter()
                .filter(|other| column.accurately_extended_by(&other.rect))
                .count()
        };
        if extenders(&expanded) < extenders(&column) {
            break;
        }
        column = expanded;
    }
    column
}

/// Next line of the block, or `None` when the block is complete.
fn next_line_index(block: &[TextLine], remaining: &[TextLine]) -> Option<usize> {
    let column = current_column(block, remaining);

    let extenders: Vec<usize> = (0..remaining.len())
        .filter(|&i| column.can_be_extended_by(&remaining[i].rect))
        .collect();
    let next = if !extenders.is_empty() {
        let topmost = extenders
            .iter()
            .copied()
            .min_by(|&a, &b| remaining[a].rect.y0.total_cmp(&remaining[b].rect.y0))?;
        // A column extender that still must be read after one of its peers
        // yields to the leftmost of those peers.
        let before_topmost: Vec<usize> = extenders
            .iter()
            .copied()
            .filter(|&i| {
                i != topmost
                    && geo(&remaining[i]).needs_to_come_before(&geo(&remaining[topmost]))
            })
            .collect();
        if before_topmost.is_empty() {
            topmost
        } else {
            before_topmost
                .into_iter()
                .min_by(|&a, &b| remaining[a].rect.x0.total_cmp(&remaining[b].rect.x0))?
        }
    } else {
        let current = block.last()?;
        (0..remaining.len())
            .filter(|&i| distance_after(current, &remaining[i]) < CONTINUATION_DISTANCE)
            .min_by(|&a, &b| remaining[a].rect.y0.total_cmp(&remaining[b].rect.y0))?
    };

    // Another line with a claim to come first closes the block; it will
    // seed the next one.
    let next_geo = geo(&remaining[next]);
    if remaining
        .iter()
        .enumerate()
        .any(|(i, line)| i != next && geo(line).needs_to_come_before(&next_geo))
    {
        return None;
    }
    Some(next)
}

/// Groups the lines into blocks and orders them for reading. Every input
/// line appears in exactly one block.
pub fn sort_lines(lines: Vec<TextLine>) -> Vec<ReadingOrderBlock> {
    let mut remaining = lines;
    let mut blocks = Vec::new();
    while !remaining.is_empty() {
        let start = find_block_start(&remaining);
        let mut block = vec![remaining.remove(start)];
        while let Some(next) = next_line_index(&block, &remaining) {
            block.push(remaining.remove(next));
        }
        blocks.push(ReadingOrderBlock::new(block));
    }
    blocks
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn line(rect: Rect, text: &str) -> TextLine {
        TextLine {
            text: text.to_string(),
            orientation: 0.0,
            derotated_rect: Rect::new(0.0, 0.0, 1.0, 1.0),
            rect,
            confidence: 1.0,
            words: vec![],
        }
    }

    fn sorted_text(lines: Vec<TextLine>) -> String {
        sort_lines(lines)
            .iter()
            .map(|block| block.text())
            .collect::<Vec<_>>()
            .join(" ")
    }

    #[test]
    fn test_needs_to_come_before_neighbors() {
        let reference = ReadingOrderGeometry::new(Rect::new(100.0, 100.0, 200.0, 200.0));

        let slight_left = ReadingOrderGeometry::new(Rect::new(99.0, 100.0, 199.0, 200.0));
        assert!(slight_left.needs_to_come_before(&reference));

        let slight_right = ReadingOrderGeometry::new(Rect::new(101.0, 100.0, 201.0, 200.0));
        assert!(!slight_right.needs_to_come_before(&reference));

        let slight_up = ReadingOrderGeometry::new(Rect::new(100.0, 99.0, 200.0, 199.0));
        assert!(slight_up.needs_to_come_before(&reference));

        let slight_down = ReadingOrderGeometry::new(Rect::new(100.0, 101.0, 199.0, 201.0));
        assert!(!slight_down.needs_to_come_before(&reference));

        let next_column = ReadingOrderGeometry::new(Rect::new(200.0, 0.0, 300.0, 100.0));
        assert!(!next_column.needs_to_come_before(&reference));

        let above_right_hand_side = ReadingOrderGeometry::new(Rect::new(190.0, 90.0, 200.0, 100.0));
        assert!(above_right_hand_side.needs_to_come_before(&reference));

        let wide_above = ReadingOrderGeometry::new(Rect::new(50.0, 0.0, 400.0, 100.0));
        assert!(wide_above.needs_to_come_before(&reference));

        let below_right_hand_side =
            ReadingOrderGeometry::new(Rect::new(190.0, 200.0, 200.0, 210.0));
        assert!(!below_right_hand_side.needs_to_come_before(&reference));

        assert!(!reference.needs_to_come_before(&reference));
    }

    #[test]
    fn test_relation_admits_cycles_and_sort_still_terminates() {
        // b before a, c before b, and yet a before c. The relation is not a
        // strict partial order; the sorter must terminate anyway and must
        // emit every line.
        let a = ReadingOrderGeometry::new(Rect::new(200.0, 0.0, 300.0, 100.0));
        let b = ReadingOrderGeometry::new(Rect::new(100.0, 0.0, 250.0, 400.0));
        let c = ReadingOrderGeometry::new(Rect::new(0.0, 100.0, 300.0, 200.0));
        assert!(b.needs_to_come_before(&a));
        assert!(c.needs_to_come_before(&b));
        assert!(a.needs_to_come_before(&c));

        let lines = vec![line(a.rect, "A"), line(b.rect, "B"), line(c.rect, "C")];
        let blocks = sort_lines(lines);
        let total: usize = blocks.iter().map(|b| b.lines.len()).sum();
        assert_eq!(total, 3);
    }

    #[test]
    fn test_two_columns_left_first() {
        // Right column inserted first; the left one must still be read
        // first, in full, before the right one.
        let mut lines = Vec::new();
        for i in 0..8 {
            let y = 10.0 + 12.0 * i as f32;
            lines.push(line(Rect::new(240.0, y, 440.0, y + 10.0), &format!("r{i}")));
        }
        for i in 0..8 {
            let y = 10.0 + 12.0 * i as f32;
            lines.push(line(Rect::new(0.0, y, 200.0, y + 10.0), &format!("l{i}")));
        }
        assert_eq!(
            sorted_text(lines),
            "l0 l1 l2 l3 l4 l5 l6 l7 r0 r1 r2 r3 r4 r5 r6 r7"
        );
    }

    #[test]
    fn test_header_before_body() {
        let mut lines = vec![line(Rect::new(70.0, 0.0, 170.0, 12.0), "Header")];
        for i in 0..5 {
            let y = 50.0 + 12.0 * i as f32;
            lines.push(line(Rect::new(0.0, y, 200.0, y + 10.0), &format!("b{i}")));
        }
        assert_eq!(sorted_text(lines), "Header b0 b1 b2 b3 b4");
    }

    #[test]
    fn test_main_column_before_sidenotes() {
        let mut lines = Vec::new();
        for i in 0..20 {
            let y = 5.0 + 12.0 * i as f32;
            lines.push(line(Rect::new(50.0, y, 250.0, y + 10.0), &format!("m{i}")));
        }
        // Two right-side notes at different heights.
        for i in 0..3 {
            let y = 30.0 + 12.0 * i as f32;
            lines.push(line(Rect::new(270.0, y, 370.0, y + 10.0), &format!("n1_{i}")));
        }
        for i in 0..3 {
            let y = 150.0 + 12.0 * i as f32;
            lines.push(line(Rect::new(270.0, y, 370.0, y + 10.0), &format!("n2_{i}")));
        }
        let text = sorted_text(lines);
        assert_eq!(
            text,
            "m0 m1 m2 m3 m4 m5 m6 m7 m8 m9 m10 m11 m12 m13 m14 m15 m16 m17 m18 m19 \
             n1_0 n1_1 n1_2 n2_0 n2_1 n2_2"
        );
    }

    #[test]
    fn test_table_with_vertical_gap_and_sidenote() {
        let mut lines = Vec::new();
        for i in 0..5 {
            let y = 11.0 * i as f32;
            lines.push(line(
                Rect::new(20.0, y, 34.0, y + 10.0),
                &(i + 1).to_string(),
            ));
        }
        // Blank band, then the second half of the column.
        for i in 5..10 {
            let y = 33.0 + 11.0 * i as f32;
            lines.push(line(
                Rect::new(20.0, y, 34.0, y + 10.0),
                &(i + 1).to_string(),
            ));
        }
        // A sidenote to the right of the gap.
        for (j, y) in [60.0f32, 72.0, 84.0].iter().enumerate() {
            lines.push(line(
                Rect::new(70.0, *y, 170.0, y + 10.0),
                &format!("note{j}"),
            ));
        }
        assert_eq!(sorted_text(lines), "1 2 3 4 5 6 7 8 9 10 note0 note1 note2");
    }

    #[test]
    fn test_indentation_does_not_start_a_new_block() {
        let lines = vec![
            line(Rect::new(0.0, 0.0, 60.0, 7.0), "This is line number one"),
            line(Rect::new(0.0, 10.0, 60.0, 17.0), "This is line number two"),
            line(Rect::new(12.0, 20.0, 47.0, 27.0), "Indentation line"),
            line(Rect::new(0.0, 30.0, 62.0, 37.0), "This is line number four"),
        ];
        let blocks = sort_lines(lines);
        assert_eq!(blocks.len(), 1, "indentation must not start a new block");
        assert_eq!(
            blocks[0].text(),
            "This is line number one This is line number two Indentation line This is line number four"
        );
    }

    #[test]
    fn test_overlapping_lines_keep_insertion_order() {
        let lines = vec![
            line(Rect::new(0.0, 2.0, 30.0, 13.0), "One"),
            line(Rect::new(0.0, 9.0, 30.0, 20.0), "Two"),
            line(Rect::new(0.0, 16.0, 40.0, 27.0), "Three"),
        ];
        assert_eq!(sorted_text(lines), "One Two Three");
    }

    #[test]
    fn test_right_aligned_diagonal_reads_top_first() {
        // Right-aligned stack: the bottom line has the smallest x0, but the
        // top (shortest) one must still be read first.
        let lines = vec![
            line(Rect::new(150.0, 0.0, 200.0, 12.0), "Short"),
            line(Rect::new(80.0, 15.0, 200.0, 27.0), "This is a medium line"),
            line(
                Rect::new(10.0, 30.0, 200.0, 42.0),
                "This is a long long long long long line",
            ),
        ];
        assert_eq!(
            sorted_text(lines),
            "Short This is a medium line This is a long long long long long line"
        );
    }

    #[test]
    fn test_empty_input() {
        assert!(sort_lines(Vec::new()).is_empty());
    }

    #[test]
    fn test_block_rect_and_sort_key() {
        let blocks = sort_lines(vec![
            line(Rect::new(10.0, 10.0, 100.0, 20.0), "a"),
            line(Rect::new(10.0, 22.0, 110.0, 32.0), "b"),
        ]);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].rect, Rect::new(10.0, 10.0, 110.0, 32.0));
        assert_eq!(blocks[0].sort_key, 20.0);
    }
}
