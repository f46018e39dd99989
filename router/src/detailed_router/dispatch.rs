//! Batch execution. A batch of work items goes out, a result per item comes
//! back in item order, whether the workers run on the local thread pool or
//! behind a byte channel the way remote processes would.

use crate::algo::astar::AStar;
use crate::error::{Result, RouteError};
use crate::worker::index::DesignIndex;
use crate::worker::{WorkItem, WorkResult, run_worker};
use eda_common::db::core::Design;
use eda_common::db::figure::ConnFig;
use eda_common::db::indices::NetId;
use eda_common::db::marker::Marker;
use eda_common::geom::point::Point;
use eda_common::geom::rect::Rect;
use eda_common::util::config::DetailedRoutingConfig;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

pub trait Dispatcher: Send {
    /// Runs every item against the current design and returns the results
    /// in item order.
    fn dispatch(&mut self, design: &Design, index: &DesignIndex, items: &[WorkItem], iter: usize) -> Result<Vec<WorkResult>>;
}

/// Runs workers on the rayon pool, one A* scratch buffer per thread.
pub struct LocalDispatcher<'a> {
    cfg: &'a DetailedRoutingConfig,
}

impl<'a> LocalDispatcher<'a> {
    pub fn new(cfg: &'a DetailedRoutingConfig) -> Self {
        Self { cfg }
    }
}

impl Dispatcher for LocalDispatcher<'_> {
    fn dispatch(&mut self, design: &Design, index: &DesignIndex, items: &[WorkItem], iter: usize) -> Result<Vec<WorkResult>> {
        let cfg = self.cfg;
        let total = items.len();
        let progress = AtomicUsize::new(0);
        let results = items
            .par_iter()
            .map_with(AStar::new(), |astar, item| {
                let res = run_worker(design, index, cfg, item, astar);
                let p = progress.fetch_add(1, Ordering::Relaxed) + 1;
                if p.is_multiple_of(16) || p == total {
                    eprint!("\r\x1b[36m[DR Iter {}] {}/{}\x1b[0m\x1b[K", iter, p, total);
                    let _ = std::io::stderr().flush();
                }
                res
            })
            .collect::<Result<Vec<_>>>();
        eprint!("\r\x1b[K");
        results
    }
}

/// Geometry and markers that changed since the last update a remote worker
/// received.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DesignUpdate {
    pub nets: Vec<(NetId, Vec<ConnFig>)>,
    pub markers: Vec<Marker>,
}

impl DesignUpdate {
    /// Nets whose figures differ from `synced`, plus the full marker list.
    pub fn diff(synced: &[Vec<ConnFig>], design: &Design) -> Self {
        let nets = design
            .nets
            .iter()
            .enumerate()
            .filter(|(i, n)| synced.get(*i) != Some(&n.figures))
            .map(|(i, n)| (NetId::new(i), n.figures.clone()))
            .collect();
        Self {
            nets,
            markers: design.markers.clone(),
        }
    }

    pub fn apply(&self, design: &mut Design) {
        for (id, figs) in &self.nets {
            design.net_mut(*id).figures = figs.clone();
        }
        design.markers = self.markers.clone();
    }
}

#[derive(Serialize, Deserialize)]
enum Request {
    Globals(Box<Design>, Box<DetailedRoutingConfig>),
    Update(DesignUpdate),
    Work(WorkItem),
    Shutdown,
}

#[derive(Serialize, Deserialize)]
enum Reply {
    Done(Box<WorkResult>),
    SearchFailed {
        net: String,
        pin: String,
        sources: Vec<(Point, u8)>,
        route_box: Rect,
    },
    Failed(String),
}

impl From<RouteError> for Reply {
    fn from(e: RouteError) -> Self {
        match e {
            RouteError::SearchFailed {
                net,
                pin,
                sources,
                route_box,
            } => Reply::SearchFailed {
                net,
                pin,
                sources,
                route_box,
            },
            other => Reply::Failed(other.to_string()),
        }
    }
}

struct Remote {
    tx: Sender<Vec<u8>>,
    handle: Option<JoinHandle<()>>,
}

/// Workers behind serialized byte channels. The design goes out once, each
/// batch after that only carries what changed.
pub struct RemoteDispatcher {
    remotes: Vec<Remote>,
    replies: Receiver<Vec<u8>>,
    synced: Vec<Vec<ConnFig>>,
}

impl RemoteDispatcher {
    pub fn start(design: &Design, cfg: &DetailedRoutingConfig, workers: usize) -> Result<Self> {
        let (reply_tx, replies) = mpsc::channel();
        let globals = bincode::serialize(&Request::Globals(Box::new(design.clone()), Box::new(cfg.clone())))?;
        let mut remotes = Vec::new();
        for i in 0..workers.max(1) {
            let (tx, rx) = mpsc::channel::<Vec<u8>>();
            let reply_tx = reply_tx.clone();
            let handle = std::thread::Builder::new()
                .name(format!("dr-remote-{i}"))
                .spawn(move || serve(rx, reply_tx))?;
            tx.send(globals.clone())
                .map_err(|_| RouteError::Dispatch(format!("remote worker {i} hung up")))?;
            remotes.push(Remote {
                tx,
                handle: Some(handle),
            });
        }
        log::info!("Started {} remote workers ({} bytes of globals each)", remotes.len(), globals.len());
        Ok(Self {
            remotes,
            replies,
            synced: design.nets.iter().map(|n| n.figures.clone()).collect(),
        })
    }

    fn send(&self, k: usize, bytes: Vec<u8>) -> Result<()> {
        self.remotes[k]
            .tx
            .send(bytes)
            .map_err(|_| RouteError::Dispatch(format!("remote worker {k} hung up")))
    }
}

impl Dispatcher for RemoteDispatcher {
    fn dispatch(&mut self, design: &Design, _index: &DesignIndex, items: &[WorkItem], iter: usize) -> Result<Vec<WorkResult>> {
        let update = DesignUpdate::diff(&self.synced, design);
        log::debug!("iter {iter}: syncing {} changed nets to remote workers", update.nets.len());
        let bytes = bincode::serialize(&Request::Update(update))?;
        for k in 0..self.remotes.len() {
            self.send(k, bytes.clone())?;
        }
        self.synced = design.nets.iter().map(|n| n.figures.clone()).collect();

        for (i, item) in items.iter().enumerate() {
            self.send(i % self.remotes.len(), bincode::serialize(&Request::Work(item.clone()))?)?;
        }
        let mut results = Vec::with_capacity(items.len());
        let mut failure = None;
        for done in 0..items.len() {
            let bytes = self
                .replies
                .recv()
                .map_err(|_| RouteError::Dispatch("remote workers hung up".to_string()))?;
            match bincode::deserialize::<Reply>(&bytes)? {
                Reply::Done(r) => results.push(*r),
                Reply::SearchFailed {
                    net,
                    pin,
                    sources,
                    route_box,
                } => {
                    failure.get_or_insert(RouteError::SearchFailed {
                        net,
                        pin,
                        sources,
                        route_box,
                    });
                }
                Reply::Failed(msg) => {
                    failure.get_or_insert(RouteError::Dispatch(msg));
                }
            }
            eprint!("\r\x1b[36m[DR Iter {}] {}/{}\x1b[0m\x1b[K", iter, done + 1, items.len());
        }
        eprint!("\r\x1b[K");
        if let Some(e) = failure {
            return Err(e);
        }
        results.sort_by_key(|r| r.id);
        Ok(results)
    }
}

impl Drop for RemoteDispatcher {
    fn drop(&mut self) {
        let bye = bincode::serialize(&Request::Shutdown).unwrap_or_default();
        for r in &self.remotes {
            let _ = r.tx.send(bye.clone());
        }
        for r in &mut self.remotes {
            if let Some(h) = r.handle.take() {
                let _ = h.join();
            }
        }
    }
}

/// Remote worker loop: keeps its own copy of the design in sync and answers
/// every work request with one reply.
fn serve(rx: Receiver<Vec<u8>>, tx: Sender<Vec<u8>>) {
    let mut state: Option<(Design, DetailedRoutingConfig, DesignIndex)> = None;
    let mut astar = AStar::new();
    while let Ok(bytes) = rx.recv() {
        let reply = match bincode::deserialize::<Request>(&bytes) {
            Ok(Request::Globals(design, cfg)) => {
                let index = DesignIndex::build(&design);
                state = Some((*design, *cfg, index));
                continue;
            }
            Ok(Request::Update(update)) => {
                if let Some((design, _, index)) = &mut state {
                    update.apply(design);
                    *index = DesignIndex::build(design);
                }
                continue;
            }
            Ok(Request::Shutdown) => return,
            Ok(Request::Work(item)) => match &state {
                Some((design, cfg, index)) => match run_worker(design, index, cfg, &item, &mut astar) {
                    Ok(r) => Reply::Done(Box::new(r)),
                    Err(e) => e.into(),
                },
                None => Reply::Failed("work before globals".to_string()),
            },
            Err(e) => Reply::Failed(format!("bad request: {e}")),
        };
        let Ok(bytes) = bincode::serialize(&reply) else {
            return;
        };
        if tx.send(bytes).is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eda_common::db::figure::{PathSeg, SegStyle};
    use eda_common::db::tech::Tech;

    #[test]
    fn update_carries_only_changed_nets() {
        let mut d = Design::new("u", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        d.add_net("a");
        d.add_net("b");
        let synced: Vec<Vec<ConnFig>> = d.nets.iter().map(|n| n.figures.clone()).collect();
        let seg = ConnFig::Seg(PathSeg::new(0, Point::new(0, 100), Point::new(400, 100), SegStyle::extended(100)));
        d.net_mut(NetId(1)).figures.push(seg);

        let update = DesignUpdate::diff(&synced, &d);
        assert_eq!(update.nets, vec![(NetId(1), vec![seg])]);

        let mut other = Design::new("u", Tech::standard(2, 200, 100, 100), Rect::from_coords(0, 0, 4000, 4000), 2000);
        other.add_net("a");
        other.add_net("b");
        update.apply(&mut other);
        assert_eq!(other.net(NetId(1)).figures, vec![seg]);
    }
}
