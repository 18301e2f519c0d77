//! The fusion engine: a single owned value holding every cache, counter,
//! and history the merge procedure needs (REDESIGN FLAG R1 — no global
//! state, unlike the original per-process module dictionaries). Grounded
//! on `original_source`'s `merge_argus_zeek.py` for the merge semantics and
//! on spec.md §4.2/§4.3 for the authoritative procedure.

use std::time::Duration;

use ids_core::config::FusionConfig;
use ids_core::{FlowRecord, FusedRecord, ProtoRecord, RawFields};
use tracing::{debug, warn};

use crate::cache::BoundedCache;
use crate::counters::KeyedCounters;
use crate::durability::{AppendLog, LostDump};
use crate::history::FusionHistory;
use crate::http_acc::HttpAccumulator;

pub struct FusionEngine {
    flow_cache: BoundedCache<FlowRecord>,
    protocol_cache: BoundedCache<ProtoRecord>,
    http_acc: HttpAccumulator,
    http_counters: KeyedCounters,
    ftp_counters: KeyedCounters,
    history: FusionHistory,
    flow_log: AppendLog,
    protocol_log: AppendLog,
    merge_log: AppendLog,
    lost_flow: LostDump,
    lost_protocol: LostDump,
}

impl FusionEngine {
    pub fn new(cfg: &FusionConfig) -> anyhow::Result<Self> {
        let throttle = Duration::from_millis(cfg.lost_redump_throttle_ms);
        Ok(FusionEngine {
            flow_cache: BoundedCache::new(cfg.flow_cache_capacity, cfg.max_age_secs),
            protocol_cache: BoundedCache::new(cfg.protocol_cache_capacity, cfg.max_age_secs),
            http_acc: HttpAccumulator::new(),
            http_counters: KeyedCounters::new(cfg.http_ftp_counter_capacity),
            ftp_counters: KeyedCounters::new(cfg.http_ftp_counter_capacity),
            history: FusionHistory::new(cfg.history_capacity),
            flow_log: AppendLog::open(format!("{}/flow.jsonl", cfg.append_log_path), false)?,
            protocol_log: AppendLog::open(format!("{}/protocol.jsonl", cfg.append_log_path), false)?,
            merge_log: AppendLog::open(format!("{}/merge.jsonl", cfg.append_log_path), false)?,
            lost_flow: LostDump::new(format!("{}/flow.log", cfg.lost_log_path), throttle),
            lost_protocol: LostDump::new(format!("{}/protocol.log", cfg.lost_log_path), throttle),
        })
    }

    fn parse_raw(line: &str) -> anyhow::Result<RawFields> {
        let value: serde_json::Value = serde_json::from_str(line)?;
        let obj = value
            .as_object()
            .ok_or_else(|| anyhow::anyhow!("record is not a JSON object"))?;
        Ok(obj.clone().into_iter().collect())
    }

    fn dump_lost_caches(&mut self) -> anyhow::Result<()> {
        let flow_lines: Vec<String> = self.flow_cache.raw_lines().map(str::to_string).collect();
        self.lost_flow
            .maybe_rewrite(flow_lines.iter().map(String::as_str))?;
        let protocol_lines: Vec<String> = self.protocol_cache.raw_lines().map(str::to_string).collect();
        self.lost_protocol
            .maybe_rewrite(protocol_lines.iter().map(String::as_str))?;
        Ok(())
    }

    /// Handles one line off the flow queue. Returns the fused record to
    /// forward downstream, if a merge (or an immediate zero-correlation
    /// emit) happened.
    pub fn handle_flow_line(&mut self, raw_line: &str, now: i64) -> anyhow::Result<Option<FusedRecord>> {
        let raw = match Self::parse_raw(raw_line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "malformed flow record, skipping");
                return Ok(None);
            }
        };
        self.flow_log.append_line(raw_line)?;

        let Some(flow) = FlowRecord::from_raw(&raw) else {
            warn!("flow record has an unparseable timestamp, skipping");
            return Ok(None);
        };

        if !flow.is_correlatable() {
            let fused = self.emit_unmatched_protocol(&flow);
            self.history.push(fused.clone());
            self.write_merge_record(&fused)?;
            return Ok(Some(fused));
        }

        let key = flow.flow_key();

        if let Some(acc) = self.http_acc.take(&key) {
            let fused = self.merge_flow_with_http_accumulator(&flow, &acc);
            self.history.push(fused.clone());
            self.write_merge_record(&fused)?;
            return Ok(Some(fused));
        }

        if let Some(entry) = self.protocol_cache.take_matching(&key, now) {
            let fused = self.merge(&flow, &entry.record);
            self.history.push(fused.clone());
            self.write_merge_record(&fused)?;
            return Ok(Some(fused));
        }

        self.flow_cache.push(key, flow, raw_line.to_string(), now);
        self.dump_lost_caches()?;
        Ok(None)
    }

    /// Handles one line off the protocol queue.
    pub fn handle_protocol_line(&mut self, raw_line: &str, now: i64) -> anyhow::Result<Option<FusedRecord>> {
        let raw = match Self::parse_raw(raw_line) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(error = %e, "malformed protocol record, skipping");
                return Ok(None);
            }
        };
        self.protocol_log.append_line(raw_line)?;

        let Some(proto) = ProtoRecord::from_raw(&raw) else {
            debug!("protocol record missing or unknown log_kind, skipping");
            return Ok(None);
        };
        let key = proto.flow_key();

        match &proto {
            ProtoRecord::Http(common, http) => {
                let counter_key =
                    KeyedCounters::key(&common.orig_h, common.orig_p, &common.resp_h, common.resp_p, &http.method);
                self.http_counters.increment(&counter_key);
                self.http_acc
                    .accumulate(key.clone(), http.trans_depth, http.response_body_len, &http.method);
                self.protocol_cache.push(key, proto.clone(), raw_line.to_string(), now);
                self.dump_lost_caches()?;
                Ok(None)
            }
            ProtoRecord::Ftp(common, ftp) => {
                if !ftp.command.trim().is_empty() {
                    let counter_key = KeyedCounters::key(
                        &common.orig_h,
                        common.orig_p,
                        &common.resp_h,
                        common.resp_p,
                        &ftp.command,
                    );
                    self.ftp_counters.increment(&counter_key);
                }
                if let Some(entry) = self.flow_cache.peek_matching(&key, now) {
                    let flow = entry.record.clone();
                    let fused = self.merge(&flow, &proto);
                    self.history.push(fused.clone());
                    self.write_merge_record(&fused)?;
                    Ok(Some(fused))
                } else {
                    self.protocol_cache.push(key, proto, raw_line.to_string(), now);
                    self.dump_lost_caches()?;
                    Ok(None)
                }
            }
            ProtoRecord::Conn(..) => {
                if let Some(entry) = self.flow_cache.take_matching(&key, now) {
                    let fused = self.merge(&entry.record, &proto);
                    self.history.push(fused.clone());
                    self.write_merge_record(&fused)?;
                    Ok(Some(fused))
                } else {
                    self.protocol_cache.push(key, proto, raw_line.to_string(), now);
                    self.dump_lost_caches()?;
                    Ok(None)
                }
            }
        }
    }

    fn write_merge_record(&mut self, fused: &FusedRecord) -> anyhow::Result<()> {
        self.merge_log.append_line(&serde_json::to_string(fused)?)
    }

    /// A flow record with an unsupported protocol emits immediately, with
    /// all HTTP/FTP fields and counters zeroed (spec.md §3, §4.2 step 3).
    fn emit_unmatched_protocol(&self, flow: &FlowRecord) -> FusedRecord {
        let counters = self
            .history
            .counters_for(&flow.saddr, flow.sport, &flow.daddr, flow.dport, "-", flow.ltime);
        FusedRecord {
            saddr: flow.saddr.clone(),
            sport: flow.sport,
            daddr: flow.daddr.clone(),
            dport: flow.dport,
            proto: flow.proto.clone(),
            state: flow.state.clone(),
            dur: flow.dur,
            sbytes: flow.sbytes,
            dbytes: flow.dbytes,
            sttl: flow.sttl,
            dttl: flow.dttl,
            sloss: flow.sloss,
            dloss: flow.dloss,
            service: "-".to_string(),
            sload: flow.sload,
            dload: flow.dload,
            spkts: flow.spkts,
            dpkts: flow.dpkts,
            stcpb: flow.stcpb,
            dtcpb: flow.dtcpb,
            smeansz: flow.smeansz,
            dmeansz: flow.dmeansz,
            trans_depth: 0,
            response_body_len: 0,
            sjit: flow.sjit,
            djit: flow.djit,
            stime: flow.stime,
            ltime: flow.ltime,
            sintpkt: flow.sintpkt,
            dintpkt: flow.dintpkt,
            tcprtt: flow.tcprtt,
            synack: flow.synack,
            ackdat: flow.ackdat,
            is_sm_ips_ports: flow.is_sm_ips_ports() as u8,
            ct_flw_http_mthd: 0,
            is_ftp_login: 0,
            ct_ftp_cmd: 0,
            ct_srv_src: counters.ct_srv_src,
            ct_srv_dst: counters.ct_srv_dst,
            ct_dst_ltm: counters.ct_dst_ltm,
            ct_src_ltm: counters.ct_src_ltm,
            ct_src_dport_ltm: counters.ct_src_dport_ltm,
            ct_dst_sport_ltm: counters.ct_dst_sport_ltm,
            ct_dst_src_ltm: counters.ct_dst_src_ltm,
        }
    }

    fn merge_flow_with_http_accumulator(
        &mut self,
        flow: &FlowRecord,
        acc: &crate::http_acc::HttpAccumulatorEntry,
    ) -> FusedRecord {
        let counter_key = KeyedCounters::key(&flow.saddr, flow.sport, &flow.daddr, flow.dport, &acc.last_method);
        let ct_flw_http_mthd = self.http_counters.get(&counter_key);
        let mut fused = self.base_fused(flow);
        fused.service = "http".to_string();
        fused.trans_depth = acc.max_trans_depth;
        fused.response_body_len = acc.sum_response_body_len;
        fused.ct_flw_http_mthd = ct_flw_http_mthd;
        let counters = self
            .history
            .counters_for(&fused.saddr, fused.sport, &fused.daddr, fused.dport, &fused.service, fused.ltime);
        apply_counters(&mut fused, counters);
        fused
    }

    /// The merge procedure (spec.md §4.2 step 6): combine a flow record
    /// with its correlated protocol record.
    fn merge(&mut self, flow: &FlowRecord, proto: &ProtoRecord) -> FusedRecord {
        let mut fused = self.base_fused(flow);
        match proto {
            ProtoRecord::Http(common, http) => {
                let counter_key =
                    KeyedCounters::key(&common.orig_h, common.orig_p, &common.resp_h, common.resp_p, &http.method);
                fused.service = "http".to_string();
                fused.trans_depth = http.trans_depth;
                fused.response_body_len = http.response_body_len;
                fused.ct_flw_http_mthd = self.http_counters.get(&counter_key);
            }
            ProtoRecord::Ftp(common, ftp) => {
                fused.service = "ftp".to_string();
                fused.is_ftp_login = (!ftp.user.trim().is_empty() && !ftp.password.trim().is_empty()) as u8;
                if !ftp.command.trim().is_empty() {
                    let counter_key = KeyedCounters::key(
                        &common.orig_h,
                        common.orig_p,
                        &common.resp_h,
                        common.resp_p,
                        &ftp.command,
                    );
                    fused.ct_ftp_cmd = self.ftp_counters.get(&counter_key);
                }
            }
            ProtoRecord::Conn(_, conn) => {
                fused.service = if conn.service.trim().is_empty() || conn.service == "-" {
                    "-".to_string()
                } else {
                    conn.service.clone()
                };
            }
        }
        let counters = self
            .history
            .counters_for(&fused.saddr, fused.sport, &fused.daddr, fused.dport, &fused.service, fused.ltime);
        apply_counters(&mut fused, counters);
        fused
    }

    /// A `FusedRecord` with flow fields copied and every HTTP/FTP/counter
    /// field zeroed, ready for a protocol-specific overlay.
    fn base_fused(&self, flow: &FlowRecord) -> FusedRecord {
        FusedRecord {
            saddr: flow.saddr.clone(),
            sport: flow.sport,
            daddr: flow.daddr.clone(),
            dport: flow.dport,
            proto: flow.proto.clone(),
            state: flow.state.clone(),
            dur: flow.dur,
            sbytes: flow.sbytes,
            dbytes: flow.dbytes,
            sttl: flow.sttl,
            dttl: flow.dttl,
            sloss: flow.sloss,
            dloss: flow.dloss,
            service: "-".to_string(),
            sload: flow.sload,
            dload: flow.dload,
            spkts: flow.spkts,
            dpkts: flow.dpkts,
            stcpb: flow.stcpb,
            dtcpb: flow.dtcpb,
            smeansz: flow.smeansz,
            dmeansz: flow.dmeansz,
            trans_depth: 0,
            response_body_len: 0,
            sjit: flow.sjit,
            djit: flow.djit,
            stime: flow.stime,
            ltime: flow.ltime,
            sintpkt: flow.sintpkt,
            dintpkt: flow.dintpkt,
            tcprtt: flow.tcprtt,
            synack: flow.synack,
            ackdat: flow.ackdat,
            is_sm_ips_ports: flow.is_sm_ips_ports() as u8,
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
}

fn apply_counters(fused: &mut FusedRecord, counters: crate::history::ConnectionCounters) {
    fused.ct_srv_src = counters.ct_srv_src;
    fused.ct_srv_dst = counters.ct_srv_dst;
    fused.ct_dst_ltm = counters.ct_dst_ltm;
    fused.ct_src_ltm = counters.ct_src_ltm;
    fused.ct_src_dport_ltm = counters.ct_src_dport_ltm;
    fused.ct_dst_sport_ltm = counters.ct_dst_sport_ltm;
    fused.ct_dst_src_ltm = counters.ct_dst_src_ltm;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn temp_cfg(dir: &std::path::Path) -> FusionConfig {
        FusionConfig {
            flow_cache_capacity: 1000,
            protocol_cache_capacity: 1000,
            history_capacity: 100,
            max_age_secs: None,
            http_ftp_counter_capacity: 1000,
            append_log_path: dir.join("logs").to_string_lossy().to_string(),
            lost_log_path: dir.join("lost").to_string_lossy().to_string(),
            lost_redump_throttle_ms: 200,
        }
    }

    fn tmp_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("ids-fusion-test-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn s1_single_tcp_flow_with_matching_conn_record() {
        let dir = tmp_dir("s1");
        let mut engine = FusionEngine::new(&temp_cfg(&dir)).unwrap();

        let conn = r#"{"log_kind":"conn","id.orig_h":"10.0.0.1","id.orig_p":1234,"id.resp_h":"10.0.0.2","id.resp_p":80,"proto":"tcp","service":"http"}"#;
        assert!(engine.handle_protocol_line(conn, 1000).unwrap().is_none());

        let flow = r#"{"proto":"tcp","saddr":"10.0.0.1","sport":1234,"daddr":"10.0.0.2","dport":80,"stime":1000,"ltime":1005,"spkts":4,"dpkts":3,"sbytes":400,"dbytes":300}"#;
        let fused = engine.handle_flow_line(flow, 1005).unwrap().unwrap();

        assert_eq!(fused.service, "http");
        assert_eq!(fused.is_sm_ips_ports, 0);
        assert_eq!(fused.trans_depth, 0);
        assert_eq!(fused.response_body_len, 0);
        assert_eq!(fused.ct_flw_http_mthd, 0);
        assert_eq!(fused.ct_srv_src, 0);
    }

    #[test]
    fn s2_http_accumulation() {
        let dir = tmp_dir("s2");
        let mut engine = FusionEngine::new(&temp_cfg(&dir)).unwrap();

        for (depth, len) in [(1, 100), (2, 250), (2, 50)] {
            let http = format!(
                r#"{{"log_kind":"http","id.orig_h":"10.0.0.1","id.orig_p":1234,"id.resp_h":"10.0.0.2","id.resp_p":80,"method":"GET","trans_depth":{depth},"response_body_len":{len}}}"#
            );
            assert!(engine.handle_protocol_line(&http, 1000).unwrap().is_none());
        }

        let flow = r#"{"proto":"tcp","saddr":"10.0.0.1","sport":1234,"daddr":"10.0.0.2","dport":80,"stime":1000,"ltime":1005}"#;
        let fused = engine.handle_flow_line(flow, 1005).unwrap().unwrap();

        assert_eq!(fused.service, "http");
        assert_eq!(fused.trans_depth, 2);
        assert_eq!(fused.response_body_len, 400);
        assert_eq!(fused.ct_flw_http_mthd, 3);
    }

    #[test]
    fn s3_ftp_login_detected() {
        let dir = tmp_dir("s3");
        let mut engine = FusionEngine::new(&temp_cfg(&dir)).unwrap();

        let user_cmd = r#"{"log_kind":"ftp","id.orig_h":"10.0.0.1","id.orig_p":5000,"id.resp_h":"10.0.0.9","id.resp_p":21,"user":"bob","password":"x","command":"USER"}"#;
        assert!(engine.handle_protocol_line(user_cmd, 1000).unwrap().is_none());
        let retr_cmd = r#"{"log_kind":"ftp","id.orig_h":"10.0.0.1","id.orig_p":5000,"id.resp_h":"10.0.0.9","id.resp_p":21,"command":"RETR"}"#;
        assert!(engine.handle_protocol_line(retr_cmd, 1001).unwrap().is_none());

        let flow = r#"{"proto":"tcp","saddr":"10.0.0.1","sport":5000,"daddr":"10.0.0.9","dport":21,"stime":1000,"ltime":1005}"#;
        let fused = engine.handle_flow_line(flow, 1005).unwrap().unwrap();

        assert_eq!(fused.service, "ftp");
        assert_eq!(fused.is_ftp_login, 1);
        assert_eq!(fused.ct_ftp_cmd, 2);
    }

    #[test]
    fn s4_unsupported_protocol_emits_immediately() {
        let dir = tmp_dir("s4");
        let mut engine = FusionEngine::new(&temp_cfg(&dir)).unwrap();

        let flow = r#"{"proto":"arp","saddr":"10.0.0.1","sport":0,"daddr":"10.0.0.2","dport":0,"stime":1000,"ltime":1000}"#;
        let fused = engine.handle_flow_line(flow, 1000).unwrap().unwrap();

        assert_eq!(fused.service, "-");
        assert_eq!(fused.trans_depth, 0);
        assert_eq!(fused.response_body_len, 0);
        assert_eq!(fused.ct_flw_http_mthd, 0);
        assert_eq!(fused.is_ftp_login, 0);
        assert_eq!(fused.ct_ftp_cmd, 0);
    }

    #[test]
    fn s5_icmp_correlation_ignores_ports() {
        let dir = tmp_dir("s5");
        let mut engine = FusionEngine::new(&temp_cfg(&dir)).unwrap();

        let conn = r#"{"log_kind":"conn","id.orig_h":"10.0.0.1","id.orig_p":0,"id.resp_h":"10.0.0.2","id.resp_p":0,"proto":"icmp","service":"-"}"#;
        assert!(engine.handle_protocol_line(conn, 1000).unwrap().is_none());

        let flow = r#"{"proto":"icmp","saddr":"10.0.0.1","sport":0,"daddr":"10.0.0.2","dport":0,"stime":1000,"ltime":1000}"#;
        let fused = engine.handle_flow_line(flow, 1000).unwrap().unwrap();

        assert_eq!(fused.proto, "icmp");
        assert_eq!(fused.saddr, "10.0.0.1");
        assert_eq!(fused.daddr, "10.0.0.2");
    }

    #[test]
    fn unmatched_flow_is_cached_and_dumped_to_lost_log() {
        let dir = tmp_dir("lost");
        let mut engine = FusionEngine::new(&temp_cfg(&dir)).unwrap();
        let flow = r#"{"proto":"tcp","saddr":"10.0.0.1","sport":1,"daddr":"10.0.0.2","dport":2,"stime":1,"ltime":1}"#;
        assert!(engine.handle_flow_line(flow, 1).unwrap().is_none());

        let mut contents = String::new();
        std::fs::File::open(dir.join("lost/flow.log"))
            .unwrap()
            .read_to_string(&mut contents)
            .unwrap();
        assert!(contents.contains("10.0.0.1"));
    }

    #[test]
    fn flow_with_unparseable_timestamp_is_skipped() {
        let dir = tmp_dir("badts");
        let mut engine = FusionEngine::new(&temp_cfg(&dir)).unwrap();
        let flow = r#"{"proto":"tcp","saddr":"10.0.0.1","sport":1,"daddr":"10.0.0.2","dport":2,"stime":"not a date","ltime":1}"#;
        assert!(engine.handle_flow_line(flow, 1).unwrap().is_none());
        assert_eq!(engine.history.len(), 0);
    }
}
