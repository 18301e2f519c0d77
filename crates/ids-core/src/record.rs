//! Record types for the two ingest streams and the fused output.
//!
//! Field lists are grounded on spec.md §3/§6 and on
//! `original_source/Recoleccion/dockers/procesar_merge/merge_argus_zeek.py`,
//! which shows the same Argus/Zeek field names this codebase receives.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::casts::{cast_epoch_seconds, cast_f64, cast_port, cast_str, cast_u32, cast_u64};

/// A loosely-typed JSON object as read off a broker queue, before coercion
/// into [`FlowRecord`] or [`ProtoRecord`]. Ingest adapters and the fusion
/// engine both speak this shape; typed structs only exist once a record's
/// kind is known.
pub type RawFields = BTreeMap<String, Value>;

/// The composite flow key used to correlate a flow record with its protocol
/// counterpart (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FlowKey {
    Icmp { saddr: String, daddr: String },
    Tuple {
        proto: String,
        saddr: String,
        sport: u32,
        daddr: String,
        dport: u32,
    },
}

impl FlowKey {
    pub fn new(proto: &str, saddr: &str, sport: u32, daddr: &str, dport: u32) -> Self {
        let proto = proto.to_ascii_lowercase();
        if proto == "icmp" {
            FlowKey::Icmp {
                saddr: saddr.to_string(),
                daddr: daddr.to_string(),
            }
        } else {
            FlowKey::Tuple {
                proto,
                saddr: saddr.to_string(),
                sport,
                daddr: daddr.to_string(),
                dport,
            }
        }
    }
}

/// A flow-record observation from the flow adapter's tabular exporter.
#[derive(Debug, Clone, Default)]
pub struct FlowRecord {
    pub stime: i64,
    pub ltime: i64,
    pub proto: String,
    pub saddr: String,
    pub sport: u32,
    pub daddr: String,
    pub dport: u32,
    pub state: String,
    pub dur: f64,
    pub sbytes: u64,
    pub dbytes: u64,
    pub sttl: u32,
    pub dttl: u32,
    pub sloss: u32,
    pub dloss: u32,
    pub sload: f64,
    pub dload: f64,
    pub spkts: u64,
    pub dpkts: u64,
    pub stcpb: u64,
    pub dtcpb: u64,
    pub smeansz: u32,
    pub dmeansz: u32,
    pub sjit: f64,
    pub djit: f64,
    pub sintpkt: f64,
    pub dintpkt: f64,
    pub tcprtt: f64,
    pub synack: f64,
    pub ackdat: f64,
}

/// The three transport protocols the fusion engine correlates on. Anything
/// else is emitted immediately without correlation (spec.md §3 invariant).
const CORRELATABLE_PROTOCOLS: [&str; 3] = ["tcp", "udp", "icmp"];

impl FlowRecord {
    /// Builds a flow record from raw fields. Returns `None` if `stime` or
    /// `ltime` is unparseable: an unparseable timestamp is fatal to the
    /// record carrying it (spec.md §4.2 step 1), unlike every other field
    /// here, which coerces to a default on failure.
    pub fn from_raw(raw: &RawFields) -> Option<Self> {
        let stime = cast_epoch_seconds(raw.get("stime"))?;
        let ltime = cast_epoch_seconds(raw.get("ltime"))?;
        Some(FlowRecord {
            stime,
            ltime,
            proto: cast_str(raw.get("proto")).to_ascii_lowercase(),
            saddr: cast_str(raw.get("saddr")),
            sport: cast_port(raw.get("sport")),
            daddr: cast_str(raw.get("daddr")),
            dport: cast_port(raw.get("dport")),
            state: cast_str(raw.get("state")),
            dur: cast_f64(raw.get("dur")),
            sbytes: cast_u64(raw.get("sbytes")),
            dbytes: cast_u64(raw.get("dbytes")),
            sttl: cast_u32(raw.get("sttl")),
            dttl: cast_u32(raw.get("dttl")),
            sloss: cast_u32(raw.get("sloss")),
            dloss: cast_u32(raw.get("dloss")),
            sload: cast_f64(raw.get("sload")),
            dload: cast_f64(raw.get("dload")),
            spkts: cast_u64(raw.get("spkts")),
            dpkts: cast_u64(raw.get("dpkts")),
            stcpb: cast_u64(raw.get("stcpb")),
            dtcpb: cast_u64(raw.get("dtcpb")),
            smeansz: cast_u32(raw.get("smeansz")),
            dmeansz: cast_u32(raw.get("dmeansz")),
            sjit: cast_f64(raw.get("sjit")),
            djit: cast_f64(raw.get("djit")),
            sintpkt: cast_f64(raw.get("sintpkt")),
            dintpkt: cast_f64(raw.get("dintpkt")),
            tcprtt: cast_f64(raw.get("tcprtt")),
            synack: cast_f64(raw.get("synack")),
            ackdat: cast_f64(raw.get("ackdat")),
        })
    }

    pub fn is_correlatable(&self) -> bool {
        CORRELATABLE_PROTOCOLS.contains(&self.proto.as_str())
    }

    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(&self.proto, &self.saddr, self.sport, &self.daddr, self.dport)
    }

    pub fn is_sm_ips_ports(&self) -> bool {
        self.saddr == self.daddr && self.sport == self.dport
    }
}

/// Fields shared by every Zeek-style protocol record.
#[derive(Debug, Clone, Default)]
pub struct ProtoCommon {
    pub proto: String,
    pub orig_h: String,
    pub orig_p: u32,
    pub resp_h: String,
    pub resp_p: u32,
}

impl ProtoCommon {
    fn from_raw(raw: &RawFields) -> Self {
        let id = raw.get("id").and_then(Value::as_object);
        let field = |direct: &str, nested: &str| -> Option<Value> {
            raw.get(direct)
                .cloned()
                .or_else(|| id.and_then(|m| m.get(nested)).cloned())
        };
        ProtoCommon {
            proto: cast_str(raw.get("proto")).to_ascii_lowercase(),
            orig_h: cast_str(field("id.orig_h", "orig_h").as_ref()),
            orig_p: cast_port(field("id.orig_p", "orig_p").as_ref()),
            resp_h: cast_str(field("id.resp_h", "resp_h").as_ref()),
            resp_p: cast_port(field("id.resp_p", "resp_p").as_ref()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConnFields {
    pub service: String,
}

#[derive(Debug, Clone, Default)]
pub struct HttpFields {
    pub trans_depth: i64,
    pub response_body_len: i64,
    pub method: String,
}

#[derive(Debug, Clone, Default)]
pub struct FtpFields {
    pub user: String,
    pub password: String,
    pub command: String,
}

/// A tagged protocol-record variant, dispatched on `log_kind` (REDESIGN FLAG R2).
#[derive(Debug, Clone)]
pub enum ProtoRecord {
    Conn(ProtoCommon, ConnFields),
    Http(ProtoCommon, HttpFields),
    Ftp(ProtoCommon, FtpFields),
}

impl ProtoRecord {
    /// Builds a typed protocol record from a raw JSON object tagged with
    /// `log_kind` by the protocol adapter.
    pub fn from_raw(raw: &RawFields) -> Option<Self> {
        let common = ProtoCommon::from_raw(raw);
        match raw.get("log_kind").and_then(Value::as_str)? {
            "conn" => Some(ProtoRecord::Conn(
                common,
                ConnFields {
                    service: cast_str(raw.get("service")),
                },
            )),
            "http" => Some(ProtoRecord::Http(
                common,
                HttpFields {
                    trans_depth: crate::casts::cast_i64(raw.get("trans_depth")),
                    response_body_len: crate::casts::cast_i64(raw.get("response_body_len")),
                    method: cast_str(raw.get("method")).to_ascii_uppercase(),
                },
            )),
            "ftp" => Some(ProtoRecord::Ftp(
                common,
                FtpFields {
                    user: cast_str(raw.get("user")),
                    password: cast_str(raw.get("password")),
                    command: cast_str(raw.get("command")),
                },
            )),
            _ => None,
        }
    }

    pub fn common(&self) -> &ProtoCommon {
        match self {
            ProtoRecord::Conn(c, _) => c,
            ProtoRecord::Http(c, _) => c,
            ProtoRecord::Ftp(c, _) => c,
        }
    }

    /// The composite key this record correlates under. HTTP/FTP records
    /// force `proto = tcp` regardless of what they report (spec.md §3).
    pub fn flow_key(&self) -> FlowKey {
        let c = self.common();
        match self {
            ProtoRecord::Conn(..) => FlowKey::new(&c.proto, &c.orig_h, c.orig_p, &c.resp_h, c.resp_p),
            ProtoRecord::Http(..) | ProtoRecord::Ftp(..) => {
                FlowKey::new("tcp", &c.orig_h, c.orig_p, &c.resp_h, c.resp_p)
            }
        }
    }
}

/// The fused record, field order exactly matching spec.md §6's merge-log
/// schema. `serde_json` serializes structs in declaration order, so this
/// order is the on-the-wire order of the merge append log (testable
/// property 1).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FusedRecord {
    pub saddr: String,
    pub sport: u32,
    pub daddr: String,
    pub dport: u32,
    pub proto: String,
    pub state: String,
    pub dur: f64,
    pub sbytes: u64,
    pub dbytes: u64,
    pub sttl: u32,
    pub dttl: u32,
    pub sloss: u32,
    pub dloss: u32,
    pub service: String,
    pub sload: f64,
    pub dload: f64,
    pub spkts: u64,
    pub dpkts: u64,
    pub stcpb: u64,
    pub dtcpb: u64,
    pub smeansz: u32,
    pub dmeansz: u32,
    pub trans_depth: i64,
    pub response_body_len: i64,
    pub sjit: f64,
    pub djit: f64,
    pub stime: i64,
    pub ltime: i64,
    pub sintpkt: f64,
    pub dintpkt: f64,
    pub tcprtt: f64,
    pub synack: f64,
    pub ackdat: f64,
    pub is_sm_ips_ports: u8,
    pub ct_flw_http_mthd: i64,
    pub is_ftp_login: u8,
    pub ct_ftp_cmd: i64,
    pub ct_srv_src: u32,
    pub ct_srv_dst: u32,
    pub ct_dst_ltm: u32,
    pub ct_src_ltm: u32,
    pub ct_src_dport_ltm: u32,
    pub ct_dst_sport_ltm: u32,
    pub ct_dst_src_ltm: u32,
}

impl FusedRecord {
    pub fn flow_key(&self) -> FlowKey {
        FlowKey::new(&self.proto, &self.saddr, self.sport, &self.daddr, self.dport)
    }

    /// Renders the scoring-queue CSV line in the exact column order of
    /// spec.md §6. `ct_state_ttl` is not part of the merge-log schema; it is
    /// computed here, at the scoring boundary, from `state`/`sttl`/`dttl`
    /// (see DESIGN.md's Open Question decisions for the bucketing formula,
    /// grounded on `original_source`'s `calculate_ct_state_ttl`).
    pub fn to_scoring_csv(&self) -> String {
        let ct_state_ttl = compute_ct_state_ttl(&self.state, self.sttl, self.dttl);
        let fields: [String; 41] = [
            self.stime.to_string(),
            self.proto.clone(),
            self.saddr.clone(),
            self.sport.to_string(),
            self.daddr.clone(),
            self.dport.to_string(),
            self.state.clone(),
            self.ltime.to_string(),
            self.spkts.to_string(),
            self.dpkts.to_string(),
            self.sbytes.to_string(),
            self.dbytes.to_string(),
            self.sttl.to_string(),
            self.dttl.to_string(),
            self.sload.to_string(),
            self.dload.to_string(),
            self.sloss.to_string(),
            self.dloss.to_string(),
            self.sintpkt.to_string(),
            self.dintpkt.to_string(),
            self.sjit.to_string(),
            self.djit.to_string(),
            self.stcpb.to_string(),
            self.dtcpb.to_string(),
            self.tcprtt.to_string(),
            self.synack.to_string(),
            self.ackdat.to_string(),
            self.smeansz.to_string(),
            self.dmeansz.to_string(),
            self.dur.to_string(),
            ct_state_ttl.to_string(),
            self.ct_flw_http_mthd.to_string(),
            self.is_ftp_login.to_string(),
            self.ct_ftp_cmd.to_string(),
            self.ct_srv_src.to_string(),
            self.ct_srv_dst.to_string(),
            self.ct_dst_ltm.to_string(),
            self.ct_src_ltm.to_string(),
            self.ct_src_dport_ltm.to_string(),
            self.ct_dst_sport_ltm.to_string(),
            self.ct_dst_src_ltm.to_string(),
        ];
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(Vec::new());
        writer.write_record(&fields).expect("in-memory csv write cannot fail");
        let bytes = writer.into_inner().expect("no pending writes");
        String::from_utf8(bytes)
            .expect("csv output is valid utf-8")
            .trim_end_matches('\n')
            .to_string()
    }
}

/// The scoring-queue CSV column order, for consumers that parse it back.
pub const SCORING_CSV_COLUMNS: [&str; 41] = [
    "stime", "proto", "saddr", "sport", "daddr", "dport", "state", "ltime", "spkts", "dpkts",
    "sbytes", "dbytes", "sttl", "dttl", "sload", "dload", "sloss", "dloss", "sintpkt", "dintpkt",
    "sjit", "djit", "stcpb", "dtcpb", "tcprtt", "synack", "ackdat", "smeansz", "dmeansz", "dur",
    "ct_state_ttl", "ct_flw_http_mthd", "is_ftp_login", "ct_ftp_cmd", "ct_srv_src", "ct_srv_dst",
    "ct_dst_ltm", "ct_src_ltm", "ct_src_dport_ltm", "ct_dst_sport_ltm", "ct_dst_src_ltm",
];

/// Buckets a TTL into the coarse range Argus/UNSW-style feature sets use:
/// 0 absent, 1 for <=64 (typical Linux-ish hop count budget), 2 for <=128
/// (Windows-ish), 3 above.
fn ttl_range(ttl: u32) -> u32 {
    if ttl == 0 {
        0
    } else if ttl <= 64 {
        1
    } else if ttl <= 128 {
        2
    } else {
        3
    }
}

/// State-code bucketing for `ct_state_ttl`. `original_source`'s
/// `calculate_ct_state_ttl` left this mapping as a stub ("debes implementar
/// tu mapeo"); this codebase fills it in with the common Argus/Zeek
/// connection-state vocabulary (see DESIGN.md).
fn state_code(state: &str) -> u32 {
    match state.to_ascii_uppercase().as_str() {
        "CON" => 1,
        "FIN" => 2,
        "REQ" => 3,
        "RST" => 4,
        "INT" => 5,
        "ECO" => 6,
        "CLO" => 7,
        "URH" => 8,
        _ => 0,
    }
}

/// `ct_state_ttl = state_code * 1000 + orig_ttl_range * 100 + resp_ttl_range`.
pub fn compute_ct_state_ttl(state: &str, sttl: u32, dttl: u32) -> u32 {
    state_code(state) * 1000 + ttl_range(sttl) * 100 + ttl_range(dttl)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn icmp_key_ignores_ports() {
        let k1 = FlowKey::new("icmp", "10.0.0.1", 0, "10.0.0.2", 0);
        let k2 = FlowKey::new("ICMP", "10.0.0.1", 7, "10.0.0.2", 99);
        assert_eq!(k1, k2);
    }

    #[test]
    fn tuple_key_distinguishes_ports() {
        let k1 = FlowKey::new("tcp", "10.0.0.1", 1, "10.0.0.2", 80);
        let k2 = FlowKey::new("tcp", "10.0.0.1", 2, "10.0.0.2", 80);
        assert_ne!(k1, k2);
    }

    #[test]
    fn http_and_ftp_force_tcp() {
        let mut raw = RawFields::new();
        raw.insert("log_kind".into(), Value::String("http".into()));
        raw.insert("proto".into(), Value::String("udp".into()));
        raw.insert("id.orig_h".into(), Value::String("10.0.0.1".into()));
        raw.insert("id.orig_p".into(), Value::String("1234".into()));
        raw.insert("id.resp_h".into(), Value::String("10.0.0.2".into()));
        raw.insert("id.resp_p".into(), Value::String("80".into()));
        let rec = ProtoRecord::from_raw(&raw).unwrap();
        match rec.flow_key() {
            FlowKey::Tuple { proto, .. } => assert_eq!(proto, "tcp"),
            other => panic!("expected tuple key, got {other:?}"),
        }
    }

    #[test]
    fn scoring_csv_has_41_columns_in_order() {
        let rec = FusedRecord {
            saddr: "10.0.0.1".into(),
            sport: 1234,
            daddr: "10.0.0.2".into(),
            dport: 80,
            proto: "tcp".into(),
            state: "CON".into(),
            dur: 1.5,
            sbytes: 10,
            dbytes: 20,
            sttl: 64,
            dttl: 64,
            sloss: 0,
            dloss: 0,
            service: "http".into(),
            sload: 0.0,
            dload: 0.0,
            spkts: 1,
            dpkts: 1,
            stcpb: 0,
            dtcpb: 0,
            smeansz: 0,
            dmeansz: 0,
            trans_depth: 0,
            response_body_len: 0,
            sjit: 0.0,
            djit: 0.0,
            stime: 1000,
            ltime: 1005,
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
        };
        let line = rec.to_scoring_csv();
        assert_eq!(line.split(',').count(), SCORING_CSV_COLUMNS.len());
        assert!(line.starts_with("1000,tcp,10.0.0.1,1234,10.0.0.2,80,CON,1005,"));
    }
}
