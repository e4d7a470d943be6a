use clap::Parser;
use smg_rs::dot::to_dot_default;
use smg_rs::fold::ListAbstractor;
use smg_rs::materialize::materialize;
use smg_rs::smg::Smg;
use smg_rs::types::{Offset, TargetSpecifier, Value};

#[derive(Parser)]
struct Args {
    /// Number of nodes in the concrete chain.
    #[arg(long, default_value_t = 8)]
    length: usize,

    /// Minimum run length required for folding.
    #[arg(long, default_value_t = 3)]
    threshold: usize,

    /// Print the folded heap in DOT format instead of dumps.
    #[arg(long)]
    dot: bool,
}

fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;

    simplelog::TermLogger::init(
        simplelog::LevelFilter::Debug,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    )?;

    let args = Args::parse();
    let nfo = Offset::new(8);

    // A uniform singly-linked chain, each node holding the same payload.
    let mut smg = Smg::new();
    let payload = smg.add_known_value(42);
    let nodes: Vec<_> = (0..args.length).map(|_| smg.add_region(16)).collect();
    for (i, &node) in nodes.iter().enumerate() {
        smg.write_value(node, Offset::new(0), 8, payload);
        let next = if i + 1 < args.length {
            smg.add_pointer(nodes[i + 1], Offset::new(0), TargetSpecifier::Region, 0)
        } else {
            Value::NULL
        };
        smg.write_value(node, nfo, 8, next);
    }
    let head = smg.add_pointer(nodes[0], Offset::new(0), TargetSpecifier::Region, 0);

    println!("concrete heap ({} objects):", smg.valid_objects().len());
    println!("{}", smg.dump());

    let abstractor = ListAbstractor::new(args.threshold);
    let folded = abstractor.find_and_abstract_lists(&smg)?;

    if args.dot {
        println!("{}", to_dot_default(&folded));
        return Ok(());
    }

    println!("folded heap ({} objects):", folded.valid_objects().len());
    println!("{}", folded.dump());

    // Walk the list back out, one materialization at a time.
    let mut heap = folded;
    let mut cursor = head;
    let mut step = 0;
    loop {
        let target = match heap.points_to(cursor) {
            Some(pt) if heap.is_valid(pt.target) => pt.target,
            _ => break,
        };
        if heap.object(target).is_region() {
            cursor = match heap.edge_at(target, nfo) {
                Some(edge) => edge.value,
                None => break,
            };
            continue;
        }
        let mut states = materialize(&heap, cursor)?;
        step += 1;
        println!(
            "materialization step {}: {} successor state(s)",
            step,
            states.len()
        );
        let (value, next_heap) = states.remove(0);
        heap = next_heap;
        cursor = value;
    }

    println!("rematerialized heap ({} objects):", heap.valid_objects().len());
    println!("{}", heap.dump());

    Ok(())
}
