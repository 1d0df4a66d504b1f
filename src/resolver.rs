use std::cmp::Reverse;

use crate::model::{normalize_callsign, FlightBatch, FlightRecord};

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum BoardSide {
    Arrival,
    Departure,
}

#[derive(Clone, Copy, Debug)]
pub struct Candidate<'a> {
    pub side: BoardSide,
    pub record: &'a FlightRecord,
}

impl Candidate<'_> {
    // Compared lexicographically; larger is better.
    fn rank(&self) -> (bool, u8, BoardSide) {
        (
            self.record.destination_icao().is_some(),
            self.record.flight_status().priority(),
            self.side,
        )
    }
}

/// Picks the single authoritative record for `tracked` out of a batch.
///
/// A callsign can appear on both sides of the board (or twice on one side when
/// the feed lags). Records with a usable destination win, then the status
/// priority decides, then departures beat arrivals. Full ties keep feed order.
pub fn resolve<'a>(tracked: &str, batch: &'a FlightBatch) -> Option<Candidate<'a>> {
    let tracked = normalize_callsign(tracked);
    if tracked.is_empty() {
        return None;
    }

    let departures = batch.departures.iter().map(|record| Candidate {
        side: BoardSide::Departure,
        record,
    });
    let arrivals = batch.arrivals.iter().map(|record| Candidate {
        side: BoardSide::Arrival,
        record,
    });

    departures
        .chain(arrivals)
        .filter(|c| normalize_callsign(&c.record.callsign) == tracked)
        .min_by_key(|c| Reverse(c.rank()))
}

#[cfg(test)]
mod tests {
    use super::{resolve, BoardSide};
    use crate::model::{FlightBatch, FlightRecord};

    fn batch(departures: Vec<FlightRecord>, arrivals: Vec<FlightRecord>) -> FlightBatch {
        FlightBatch {
            departures,
            arrivals,
        }
    }

    #[test]
    fn destination_outranks_status() {
        let data = batch(
            vec![FlightRecord::new("SWR25A").with_status("Boarding")],
            vec![FlightRecord::new("SWR25A")
                .with_status("Landed")
                .with_destination("LSZH")],
        );
        for _ in 0..3 {
            let hit = resolve("SWR25A", &data).unwrap();
            assert_eq!(hit.side, BoardSide::Arrival);
            assert_eq!(hit.record.destination.as_deref(), Some("LSZH"));
        }
    }

    #[test]
    fn status_priority_breaks_ties() {
        let data = batch(
            vec![FlightRecord::new("DLH4")
                .with_status("En Route")
                .with_destination("EDDF")],
            vec![FlightRecord::new("DLH4")
                .with_status("Taxiing")
                .with_destination("EDDM")],
        );
        let hit = resolve("dlh4", &data).unwrap();
        assert_eq!(hit.record.destination.as_deref(), Some("EDDM"));
    }

    #[test]
    fn departure_wins_full_tie() {
        let data = batch(
            vec![FlightRecord::new("AFR1")
                .with_status("Landed")
                .with_destination("LFPG")],
            vec![FlightRecord::new("AFR1")
                .with_status("Landed")
                .with_destination("LFPO")],
        );
        let hit = resolve("AFR1", &data).unwrap();
        assert_eq!(hit.side, BoardSide::Departure);
        assert_eq!(hit.record.destination.as_deref(), Some("LFPG"));
    }

    #[test]
    fn same_side_tie_keeps_feed_order() {
        let data = batch(
            vec![
                FlightRecord::new("KLM9").with_status("Departing").with_destination("EHAM"),
                FlightRecord::new("KLM9").with_status("Departing").with_destination("EHRD"),
            ],
            Vec::new(),
        );
        let hit = resolve("KLM9", &data).unwrap();
        assert_eq!(hit.record.destination.as_deref(), Some("EHAM"));
    }

    #[test]
    fn unknown_status_ranks_below_cancelled() {
        let data = batch(
            vec![FlightRecord::new("IBE7").with_status("Diverted").with_destination("LEMD")],
            vec![FlightRecord::new("IBE7").with_status("Cancelled").with_destination("LEBL")],
        );
        let hit = resolve("IBE7", &data).unwrap();
        assert_eq!(hit.record.destination.as_deref(), Some("LEBL"));
    }

    #[test]
    fn no_match_or_empty_callsign() {
        let data = batch(vec![FlightRecord::new("EZY14")], Vec::new());
        assert!(resolve("EZY15", &data).is_none());
        assert!(resolve("  ", &data).is_none());
        assert!(resolve("EZY14", &FlightBatch::default()).is_none());
    }

    #[test]
    fn callsigns_compare_normalized() {
        let data = batch(vec![FlightRecord::new(" ezy14 ")], Vec::new());
        assert!(resolve("EZY14", &data).is_some());
    }
}
