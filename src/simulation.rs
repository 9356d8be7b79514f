//! Load generator: randomized clients buying gas concurrently.
//!
//! Each client is one blocking call into [`Station::buy_gas`], run on the
//! tokio blocking pool. A semaphore caps how many clients are at the pumps at
//! once, so the pool behaves like a fixed-size worker pool.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::sync::Semaphore;

use crate::config::SimulationConfig;
use crate::error::StationError;
use crate::models::FuelType;
use crate::station::{MetricsSnapshot, PumpSnapshot, Station};

/// One simulated client's order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientRequest {
    pub client: String,
    pub category: FuelType,
    pub amount: f64,
    pub max_price: f64,
}

#[derive(Debug, Clone)]
pub struct ClientOutcome {
    pub request: ClientRequest,
    pub result: Result<f64, StationError>,
}

/// Final state of a simulation run.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub clients: usize,
    pub elapsed_ms: u64,
    /// Sum of what clients were charged, as seen by the clients.
    pub paid_by_clients: f64,
    /// Failed purchases by error kind, as seen by the clients.
    pub failures: BTreeMap<&'static str, usize>,
    pub station: MetricsSnapshot,
    pub pumps: Vec<PumpSnapshot>,
}

fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Draw `config.clients` random orders. Seeded configs are reproducible.
pub fn generate_requests(config: &SimulationConfig) -> Vec<ClientRequest> {
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    (0..config.clients)
        .map(|i| ClientRequest {
            client: format!("car {}", i),
            category: FuelType::random(&mut rng),
            amount: rng.gen_range(config.min_amount..=config.max_amount),
            max_price: rng.gen_range(config.min_budget..=config.max_budget),
        })
        .collect()
}

fn serve_client(
    station: &Station,
    request: ClientRequest,
    timeout: Option<Duration>,
) -> ClientOutcome {
    let result = match timeout {
        Some(timeout) => station.buy_gas_with_timeout(
            request.category,
            request.amount,
            request.max_price,
            timeout,
        ),
        None => station.buy_gas(request.category, request.amount, request.max_price),
    };

    match &result {
        Ok(paid) => tracing::info!(
            client = %request.client,
            category = %request.category,
            amount = request.amount,
            max_price = request.max_price,
            paid = *paid,
            "Client served"
        ),
        Err(e) if e.is_business_rejection() => tracing::info!(
            client = %request.client,
            category = %request.category,
            amount = request.amount,
            max_price = request.max_price,
            reason = e.kind(),
            "Client turned away: {}",
            e
        ),
        Err(e) => tracing::error!(
            client = %request.client,
            category = %request.category,
            "Purchase failed: {}",
            e
        ),
    }

    ClientOutcome { request, result }
}

/// Run the given orders against `station` and wait for all of them.
pub async fn run_requests(
    station: Arc<Station>,
    requests: Vec<ClientRequest>,
    config: &SimulationConfig,
) -> anyhow::Result<Vec<ClientOutcome>> {
    let workers = config.worker_threads.unwrap_or_else(default_workers).max(1);
    let semaphore = Arc::new(Semaphore::new(workers));
    let timeout = config.wait_timeout_ms.map(Duration::from_millis);

    tracing::info!(
        "Simulating {} clients on {} workers (wait timeout: {:?})",
        requests.len(),
        workers,
        timeout
    );

    let mut handles = Vec::with_capacity(requests.len());
    for request in requests {
        let permit = Arc::clone(&semaphore).acquire_owned().await?;
        let station = Arc::clone(&station);
        handles.push(tokio::task::spawn_blocking(move || {
            let _permit = permit;
            serve_client(&station, request, timeout)
        }));
    }

    let mut outcomes = Vec::with_capacity(handles.len());
    for handle in handles {
        outcomes.push(handle.await?);
    }
    Ok(outcomes)
}

/// Generate a workload from `config`, run it, and summarize.
pub async fn run_simulation(
    station: Arc<Station>,
    config: &SimulationConfig,
) -> anyhow::Result<SimulationReport> {
    let started = Instant::now();
    let requests = generate_requests(config);
    let clients = requests.len();
    let outcomes = run_requests(Arc::clone(&station), requests, config).await?;

    let mut paid_by_clients = 0.0;
    let mut failures: BTreeMap<&'static str, usize> = BTreeMap::new();
    for outcome in &outcomes {
        match &outcome.result {
            Ok(paid) => paid_by_clients += paid,
            Err(e) => *failures.entry(e.kind()).or_default() += 1,
        }
    }

    let report = SimulationReport {
        clients,
        elapsed_ms: started.elapsed().as_millis() as u64,
        paid_by_clients,
        failures,
        station: station.metrics(),
        pumps: station.gas_pumps(),
    };
    tracing::info!(
        "Simulation finished in {} ms: {} sales, {} litres, revenue {:.2}",
        report.elapsed_ms,
        report.station.sales,
        report.station.litres_sold,
        report.station.revenue
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StationConfig;

    fn seeded(clients: usize, seed: u64) -> SimulationConfig {
        SimulationConfig {
            clients,
            seed: Some(seed),
            worker_threads: Some(4),
            ..SimulationConfig::default()
        }
    }

    #[test]
    fn test_generated_requests_stay_in_range() {
        let config = seeded(200, 1);
        let requests = generate_requests(&config);
        assert_eq!(requests.len(), 200);
        for r in &requests {
            assert!(r.amount >= config.min_amount && r.amount <= config.max_amount);
            assert!(r.max_price >= config.min_budget && r.max_price <= config.max_budget);
        }
        assert_eq!(requests[0].client, "car 0");
    }

    #[test]
    fn test_seed_makes_workload_reproducible() {
        assert_eq!(
            generate_requests(&seeded(20, 99)),
            generate_requests(&seeded(20, 99))
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_report_reconciles_with_station() {
        let station = Arc::new(Station::from_config(&StationConfig::default()).unwrap());
        let config = seeded(60, 7);

        let report = run_simulation(Arc::clone(&station), &config).await.unwrap();

        let failed: usize = report.failures.values().sum();
        assert_eq!(report.clients, 60);
        assert_eq!(report.station.sales as usize + failed, 60);
        assert_eq!(
            report.failures.get("no_gas").copied().unwrap_or(0) as u64,
            report.station.cancellations_no_gas
        );
        assert_eq!(
            report.failures.get("too_expensive").copied().unwrap_or(0) as u64,
            report.station.cancellations_too_expensive
        );
        assert!((report.paid_by_clients - report.station.revenue).abs() < 1e-6);

        // 8 pumps of 50 litres each.
        let dispensed: f64 = report.pumps.iter().map(|p| p.dispensed).sum();
        assert!(dispensed <= 400.0 + 1e-9);
        assert!((dispensed - report.station.litres_sold).abs() < 1e-6);
        assert_eq!(report.pumps.len(), 8);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fixed_orders_against_two_pumps() {
        let station = Arc::new(Station::new());
        station.set_price(FuelType::Super, 1.31).unwrap();
        station.add_gas_pump(FuelType::Super, 150.0).unwrap();
        station.add_gas_pump(FuelType::Super, 150.0).unwrap();

        let requests: Vec<ClientRequest> = [100.0, 100.0, 150.0, 50.0, 50.0]
            .into_iter()
            .enumerate()
            .map(|(i, amount)| ClientRequest {
                client: format!("car {}", i),
                category: FuelType::Super,
                amount,
                max_price: 1.31,
            })
            .collect();

        let outcomes = run_requests(Arc::clone(&station), requests, &seeded(0, 0))
            .await
            .unwrap();

        let sold: f64 = outcomes
            .iter()
            .filter(|o| o.result.is_ok())
            .map(|o| o.request.amount)
            .sum();
        assert!(sold <= 300.0);
        assert!(outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err())
            .all(|e| matches!(e, StationError::NotEnoughGas { .. })));
        assert_eq!(station.number_of_sales() as usize, outcomes.iter().filter(|o| o.result.is_ok()).count());
    }
}
