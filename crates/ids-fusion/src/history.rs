//! Bounded fusion history and the seven `ct_*_ltm` connection-history
//! counters derived from it (spec.md §4.3, testable properties 4 and 5).

use std::collections::VecDeque;

use ids_core::FusedRecord;

/// The seven counters derived from a candidate record's key fields against
/// the history accumulated so far (computed *before* that record joins the
/// history — testable property 5).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConnectionCounters {
    pub ct_srv_src: u32,
    pub ct_srv_dst: u32,
    pub ct_dst_ltm: u32,
    pub ct_src_ltm: u32,
    pub ct_src_dport_ltm: u32,
    pub ct_dst_sport_ltm: u32,
    pub ct_dst_src_ltm: u32,
}

pub struct FusionHistory {
    capacity: usize,
    entries: VecDeque<FusedRecord>,
}

impl FusionHistory {
    pub fn new(capacity: usize) -> Self {
        FusionHistory {
            capacity: capacity.max(1),
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Computes the seven counters for a record about to be emitted, given
    /// its key fields, against the *current* history contents.
    pub fn counters_for(
        &self,
        saddr: &str,
        sport: u32,
        daddr: &str,
        dport: u32,
        service: &str,
        ltime: i64,
    ) -> ConnectionCounters {
        let mut c = ConnectionCounters::default();
        for r in &self.entries {
            let r_ltime = r.ltime;
            if r_ltime != ltime {
                continue;
            }
            if r.service == service && r.saddr == saddr {
                c.ct_srv_src += 1;
            }
            if r.service == service && r.daddr == daddr {
                c.ct_srv_dst += 1;
            }
            if r.daddr == daddr {
                c.ct_dst_ltm += 1;
            }
            if r.saddr == saddr {
                c.ct_src_ltm += 1;
            }
            if r.saddr == saddr && r.dport == dport {
                c.ct_src_dport_ltm += 1;
            }
            if r.daddr == daddr && r.sport == sport {
                c.ct_dst_sport_ltm += 1;
            }
            if r.saddr == saddr && r.daddr == daddr {
                c.ct_dst_src_ltm += 1;
            }
        }
        c
    }

    /// Appends a just-emitted record, evicting the oldest on overflow.
    pub fn push(&mut self, record: FusedRecord) {
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(record);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(saddr: &str, daddr: &str, sport: u32, dport: u32, service: &str, ltime: i64) -> FusedRecord {
        FusedRecord {
            saddr: saddr.into(),
            sport,
            daddr: daddr.into(),
            dport,
            proto: "tcp".into(),
            state: "CON".into(),
            dur: 0.0,
            sbytes: 0,
            dbytes: 0,
            sttl: 0,
            dttl: 0,
            sloss: 0,
            dloss: 0,
            service: service.into(),
            sload: 0.0,
            dload: 0.0,
            spkts: 0,
            dpkts: 0,
            stcpb: 0,
            dtcpb: 0,
            smeansz: 0,
            dmeansz: 0,
            trans_depth: 0,
            response_body_len: 0,
            sjit: 0.0,
            djit: 0.0,
            stime: 0,
            ltime,
            sintpkt: 0.0,
            dintpkt: 0.0,
            tcprtt: 0.0,
            synack: 0.0,
            ackdat: 0.0,
            is_sm_ips_ports: 0,
            ct_flw_http_mthd: 0,
            is_ftp_login: 0,
            ct_ftp_cmd: 0,
            ct_srv_src: 0,
            ct_srv_dst: 0,
            ct_dst_ltm: 0,
            ct_src_ltm: 0,
            ct_src_dport_ltm: 0,
            ct_dst_sport_ltm: 0,
            ct_dst_src_ltm: 0,
        }
    }

    #[test]
    fn counters_exclude_current_record_and_respect_ltime() {
        let mut h = FusionHistory::new(100);
        h.push(rec("10.0.0.1", "10.0.0.2", 1, 80, "http", 1005));
        h.push(rec("10.0.0.1", "10.0.0.3", 2, 80, "http", 1005));
        h.push(rec("10.0.0.9", "10.0.0.2", 3, 80, "http", 9999));

        let c = h.counters_for("10.0.0.1", 1, "10.0.0.2", 80, "http", 1005);
        assert_eq!(c.ct_src_ltm, 2);
        assert_eq!(c.ct_dst_ltm, 1);
        assert_eq!(c.ct_srv_src, 2);
    }

    #[test]
    fn history_never_exceeds_capacity() {
        let mut h = FusionHistory::new(3);
        for i in 0..10 {
            h.push(rec("a", "b", 1, 2, "http", i));
        }
        assert_eq!(h.len(), 3);
    }
}
