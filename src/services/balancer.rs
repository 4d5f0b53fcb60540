/// Routing view of one instance at selection time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub online: bool,
    pub in_flight: usize,
    pub capacity: usize,
}

impl Candidate {
    fn eligible(&self) -> bool {
        self.online && self.in_flight < self.capacity
    }
}

/// Least-loaded routing with a round-robin cursor for ties.
///
/// Among online instances below capacity, the one with the fewest in-flight
/// jobs wins. When several are tied, the first one at or after the cursor is
/// chosen and the cursor moves past it, so repeated ties rotate.
#[derive(Debug, Default)]
pub struct LeastLoaded {
    cursor: usize,
}

impl LeastLoaded {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index into `candidates` of the chosen instance, if any qualifies.
    pub fn select(&mut self, candidates: &[Candidate]) -> Option<usize> {
        let n = candidates.len();
        if n == 0 {
            return None;
        }

        let least = candidates
            .iter()
            .filter(|c| c.eligible())
            .map(|c| c.in_flight)
            .min()?;

        let start = self.cursor % n;
        let chosen = (0..n)
            .map(|offset| (start + offset) % n)
            .find(|&i| candidates[i].eligible() && candidates[i].in_flight == least)?;

        self.cursor = (chosen + 1) % n;
        Some(chosen)
    }
}
