//! Two-level dispatch table from bus word index to handler entry index.

const PAGE_BITS: u32 = 12;
const MAX_TOP_BITS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Node {
    Solid(u32),
    Page(Box<[u32]>),
}

/// Word-granular lookup table.
///
/// The top level holds one node per page; a page is either solid (one entry
/// for every word) or expanded into per-word entries. Lookup is two indexed
/// loads regardless of how many handlers are installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupTable {
    word_bits: u32,
    page_bits: u32,
    nodes: Vec<Node>,
}

impl LookupTable {
    /// Creates a table over `2^word_bits` words, all mapped to entry 0.
    #[must_use]
    pub fn new(word_bits: u32) -> Self {
        let page_bits = PAGE_BITS
            .max(word_bits.saturating_sub(MAX_TOP_BITS))
            .min(word_bits);
        let pages = 1_usize << (word_bits - page_bits);
        Self {
            word_bits,
            page_bits,
            nodes: vec![Node::Solid(0); pages],
        }
    }

    const fn page_mask(&self) -> u64 {
        (1_u64 << self.page_bits) - 1
    }

    const fn word_mask(&self) -> u64 {
        if self.word_bits >= 64 {
            u64::MAX
        } else {
            (1_u64 << self.word_bits) - 1
        }
    }

    /// Entry index for `word`. Bits above the table width are ignored.
    #[must_use]
    pub fn get(&self, word: u64) -> u32 {
        let word = word & self.word_mask();
        #[allow(clippy::cast_possible_truncation)]
        let page = (word >> self.page_bits) as usize;
        match &self.nodes[page] {
            Node::Solid(entry) => *entry,
            #[allow(clippy::cast_possible_truncation)]
            Node::Page(entries) => entries[(word & self.page_mask()) as usize],
        }
    }

    /// Maps words `first..=last` to `entry`.
    pub fn fill(&mut self, first: u64, last: u64, entry: u32) {
        let first = first & self.word_mask();
        let last = last & self.word_mask();
        if first > last {
            return;
        }
        let page_size = 1_u64 << self.page_bits;
        let mut word = first;
        loop {
            let page_start = word & !self.page_mask();
            let page_end = page_start + page_size - 1;
            let end = last.min(page_end);
            #[allow(clippy::cast_possible_truncation)]
            let page = (word >> self.page_bits) as usize;
            if word == page_start && end == page_end {
                self.nodes[page] = Node::Solid(entry);
            } else {
                #[allow(clippy::cast_possible_truncation)]
                let (from, to) = (
                    (word & self.page_mask()) as usize,
                    (end & self.page_mask()) as usize,
                );
                self.fill_partial(page, from, to, entry);
            }
            if end == last {
                break;
            }
            word = end + 1;
        }
    }

    fn fill_partial(&mut self, page: usize, from: usize, to: usize, entry: u32) {
        let size = 1_usize << self.page_bits;
        let node = &mut self.nodes[page];
        if let Node::Solid(current) = *node {
            if current == entry {
                return;
            }
            *node = Node::Page(vec![current; size].into_boxed_slice());
        }
        if let Node::Page(entries) = node {
            entries[from..=to].fill(entry);
            let head = entries[0];
            if entries.iter().all(|&e| e == head) {
                *node = Node::Solid(head);
            }
        }
    }

    /// Maximal runs of equal entries as `(first_word, last_word, entry)`.
    #[must_use]
    pub fn spans(&self) -> Vec<(u64, u64, u32)> {
        let mut spans: Vec<(u64, u64, u32)> = Vec::new();
        let mut push = |word: u64, last: u64, entry: u32| match spans.last_mut() {
            Some(span) if span.2 == entry && span.1 + 1 == word => span.1 = last,
            _ => spans.push((word, last, entry)),
        };
        let page_size = 1_u64 << self.page_bits;
        for (page, node) in self.nodes.iter().enumerate() {
            let base = (page as u64) << self.page_bits;
            match node {
                Node::Solid(entry) => push(base, base + page_size - 1, *entry),
                Node::Page(entries) => {
                    for (offset, entry) in entries.iter().enumerate() {
                        let word = base + offset as u64;
                        push(word, word, *entry);
                    }
                }
            }
        }
        spans
    }
}

#[cfg(test)]
mod tests {
    use super::LookupTable;

    #[test]
    fn fresh_table_maps_everything_to_entry_zero() {
        let table = LookupTable::new(16);
        assert_eq!(table.get(0), 0);
        assert_eq!(table.get(0xFFFF), 0);
        assert_eq!(table.spans(), vec![(0, 0xFFFF, 0)]);
    }

    #[test]
    fn partial_fill_expands_and_solid_fill_collapses() {
        let mut table = LookupTable::new(16);
        table.fill(0x0100, 0x01FF, 3);
        assert_eq!(table.get(0x00FF), 0);
        assert_eq!(table.get(0x0100), 3);
        assert_eq!(table.get(0x01FF), 3);
        assert_eq!(table.get(0x0200), 0);
        table.fill(0x0000, 0x0FFF, 5);
        assert_eq!(table.spans(), vec![(0, 0x0FFF, 5), (0x1000, 0xFFFF, 0)]);
    }

    #[test]
    fn fill_across_page_boundaries() {
        let mut table = LookupTable::new(16);
        table.fill(0x0FFE, 0x3001, 7);
        assert_eq!(
            table.spans(),
            vec![(0, 0x0FFD, 0), (0x0FFE, 0x3001, 7), (0x3002, 0xFFFF, 0)]
        );
    }

    #[test]
    fn narrow_tables_use_a_single_page() {
        let mut table = LookupTable::new(4);
        table.fill(2, 3, 1);
        assert_eq!(table.get(0x12), 1);
        assert_eq!(table.spans(), vec![(0, 1, 0), (2, 3, 1), (4, 15, 0)]);
    }
}
