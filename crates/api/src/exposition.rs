//! Text exposition. Families are converted to the `prometheus` protobuf model, with labels kept in
//! declared order, and rendered by `prometheus::TextEncoder`.

use std::io::Write;

use kubestate_core::{Metric, MetricFamily, MetricType};
use prometheus::{proto, Encoder, TextEncoder};

use crate::registry::KindOutput;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

/// Result of one scrape, families in registration order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Exposition {
    families: Vec<MetricFamily>,
    failures: usize,
}

impl Exposition {
    pub fn from_outputs(outputs: impl IntoIterator<Item = KindOutput>) -> Self {
        let mut expo = Exposition::default();
        for out in outputs {
            expo.failures += out.failures.len();
            expo.families.extend(out.families);
        }
        expo
    }

    pub fn families(&self) -> &[MetricFamily] { &self.families }

    pub fn family(&self, name: &str) -> Option<&MetricFamily> {
        self.families.iter().find(|f| f.name == name)
    }

    /// Generator failures skipped while building this exposition.
    pub fn failures(&self) -> usize { self.failures }

    pub fn sample_count(&self) -> usize { self.families.iter().map(|f| f.metrics.len()).sum() }

    /// Families with at least one sample, in order. The text format has no way to declare an empty family.
    pub fn to_proto(&self) -> Vec<proto::MetricFamily> {
        self.families.iter().filter(|f| !f.is_empty()).map(to_proto_family).collect()
    }

    pub fn encode<W: Write>(&self, w: &mut W) -> prometheus::Result<()> {
        TextEncoder::new().encode(&self.to_proto(), w)
    }

    pub fn encode_text(&self) -> prometheus::Result<String> {
        let mut buf = Vec::with_capacity(self.sample_count() * 96);
        self.encode(&mut buf)?;
        String::from_utf8(buf).map_err(|e| prometheus::Error::Msg(format!("exposition is not utf-8: {e}")))
    }
}

pub fn to_proto_family(family: &MetricFamily) -> proto::MetricFamily {
    let mut mf = proto::MetricFamily::default();
    mf.set_name(family.name.clone());
    mf.set_help(family.help.clone());
    mf.set_field_type(match family.metric_type {
        MetricType::Gauge => proto::MetricType::GAUGE,
        MetricType::Counter => proto::MetricType::COUNTER,
    });
    for m in &family.metrics {
        mf.mut_metric().push(to_proto_metric(family.metric_type, m));
    }
    mf
}

fn to_proto_metric(metric_type: MetricType, m: &Metric) -> proto::Metric {
    let mut pm = proto::Metric::default();
    for (k, v) in m.labels() {
        let mut lp = proto::LabelPair::default();
        lp.set_name(k.to_string());
        lp.set_value(v.to_string());
        pm.mut_label().push(lp);
    }
    match metric_type {
        MetricType::Gauge => {
            let mut g = proto::Gauge::default();
            g.set_value(m.value);
            pm.set_gauge(g);
        }
        MetricType::Counter => {
            let mut c = proto::Counter::default();
            c.set_value(m.value);
            pm.set_counter(c);
        }
    }
    pm
}
