use tabled::Tabled;

#[derive(Tabled)]
pub struct TrendRow {
    pub metric: String,
    pub count: usize,
    #[tabled(display = "float2")]
    pub avg: f64,
    #[tabled(display = "float2")]
    pub min: f64,
    #[tabled(display = "float2")]
    pub med: f64,
    #[tabled(display = "float2")]
    pub max: f64,
    #[tabled(rename = "p(90)", display = "float2")]
    pub p90: f64,
    #[tabled(rename = "p(95)", display = "float2")]
    pub p95: f64,
    #[tabled(rename = "p(99)", display = "float2")]
    pub p99: f64,
}

#[derive(Tabled)]
pub struct CounterRow {
    pub metric: String,
    pub count: u64,
    #[tabled(rename = "per second", display = "float2")]
    pub rate: f64,
}

#[derive(Tabled)]
pub struct RateRow {
    pub metric: String,
    #[tabled(display = "percent")]
    pub rate: f64,
    pub passes: u64,
    pub fails: u64,
}

fn float2(n: &f64) -> String {
    format!("{:.2}", n)
}

fn percent(n: &f64) -> String {
    format!("{:.2}%", n * 100.0)
}
