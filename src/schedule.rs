//! The trip tree data model: Schedule → Trip → Leg → Segment, grounded on
//! `eflips/schedule.py`'s `Node`/`ScheduleNode`/`TripNode`/`LegNode`/
//! `SegmentNode` hierarchy. Stored as an arena of nodes linked by index
//! (per SPEC_FULL.md §9) rather than owning references, so derived
//! aggregates (departure/arrival/distance/duration) are plain functions of
//! a node's children.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TripType {
    Passenger,
    PullOut,
    PullIn,
    Deadhead,
}

#[derive(Debug, Clone)]
pub enum NodeKind {
    Schedule { vehicle_type: String },
    Trip { trip_type: TripType, line: Option<String> },
    Leg { pause_s: i64 },
    Segment { grid_segment_id: u32, distance_km: f64, departure_s: i64, duration_s: i64, delay_s: i64 },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<usize>,
    pub children: Vec<usize>,
}

/// An arena of tree nodes rooted at index 0 (the `Schedule` node).
#[derive(Debug, Clone, Default)]
pub struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    pub fn new_schedule(vehicle_type: impl Into<String>) -> Self {
        let mut tree = Tree { nodes: Vec::new() };
        tree.nodes.push(Node { kind: NodeKind::Schedule { vehicle_type: vehicle_type.into() }, parent: None, children: Vec::new() });
        tree
    }

    pub fn root(&self) -> usize {
        0
    }

    pub fn node(&self, id: usize) -> &Node {
        &self.nodes[id]
    }

    pub fn children(&self, id: usize) -> &[usize] {
        &self.nodes[id].children
    }

    pub fn depth(&self, id: usize) -> usize {
        match self.nodes[id].parent {
            None => 0,
            Some(p) => 1 + self.depth(p),
        }
    }

    fn push_child(&mut self, parent: usize, kind: NodeKind) -> usize {
        let id = self.nodes.len();
        self.nodes.push(Node { kind, parent: Some(parent), children: Vec::new() });
        self.nodes[parent].children.push(id);
        id
    }

    pub fn add_trip(&mut self, root: usize, trip_type: TripType, line: Option<String>) -> usize {
        self.push_child(root, NodeKind::Trip { trip_type, line })
    }

    pub fn add_leg(&mut self, trip: usize, pause_s: i64) -> usize {
        self.push_child(trip, NodeKind::Leg { pause_s })
    }

    pub fn add_segment(&mut self, leg: usize, grid_segment_id: u32, distance_km: f64, departure_s: i64, duration_s: i64, delay_s: i64) -> usize {
        self.push_child(leg, NodeKind::Segment { grid_segment_id, distance_km, departure_s, duration_s, delay_s })
    }

    /// First child's departure, recursively down to the first leaf segment.
    pub fn departure(&self, id: usize) -> i64 {
        match &self.nodes[id].kind {
            NodeKind::Segment { departure_s, .. } => *departure_s,
            _ => self.departure(*self.nodes[id].children.first().expect("node has no children")),
        }
    }

    /// Last child's arrival, recursively down to the last leaf segment, plus
    /// any pause held directly on a `Leg` node.
    pub fn arrival(&self, id: usize) -> i64 {
        match &self.nodes[id].kind {
            NodeKind::Segment { departure_s, duration_s, delay_s, .. } => departure_s + duration_s + delay_s,
            NodeKind::Leg { pause_s } => {
                let last = *self.nodes[id].children.last().expect("leg has no segments");
                self.arrival(last) + pause_s
            }
            _ => self.arrival(*self.nodes[id].children.last().expect("node has no children")),
        }
    }

    pub fn distance_km(&self, id: usize) -> f64 {
        match &self.nodes[id].kind {
            NodeKind::Segment { distance_km, .. } => *distance_km,
            _ => self.nodes[id].children.iter().map(|c| self.distance_km(*c)).sum(),
        }
    }

    pub fn duration_s(&self, id: usize) -> i64 {
        self.arrival(id) - self.departure(id)
    }

    /// Verifies `leg[i].arrival <= leg[i+1].departure` across every trip's
    /// consecutive legs (the schedule-monotonicity invariant).
    pub fn check_monotonic(&self, root: usize) -> Result<(), MonotonicityViolation> {
        for &trip in &self.nodes[root].children {
            let legs = &self.nodes[trip].children;
            for pair in legs.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                if self.arrival(a) > self.departure(b) {
                    return Err(MonotonicityViolation { leg_a: a, leg_b: b, arrival: self.arrival(a), departure: self.departure(b) });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MonotonicityViolation {
    pub leg_a: usize,
    pub leg_b: usize,
    pub arrival: i64,
    pub departure: i64,
}

impl std::fmt::Display for MonotonicityViolation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "leg {} arrives at {} after leg {} departs at {}", self.leg_a, self.arrival, self.leg_b, self.departure)
    }
}
impl std::error::Error for MonotonicityViolation {}
