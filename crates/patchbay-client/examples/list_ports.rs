//! Mirror a small simulated graph, publish a MIDI node, wire it up and print
//! every port the client can see.
//!
//! `cargo run -p patchbay-client --example list_ports`

use patchbay_client::{
    keys, properties, Category, Direction, GraphClient, Instance, MediaKind, MemoryServer,
};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    // A sound card and a hardware keyboard
    let server = MemoryServer::new();
    for (channel, direction) in [("FL", "out"), ("FR", "out"), ("FL", "in"), ("FR", "in")] {
        server.add_port(properties! {
            keys::NODE_ID => "40",
            keys::PORT_DIRECTION => direction,
            keys::FORMAT_DSP => "32 bit float mono audio",
            keys::PORT_PHYSICAL => "true",
            keys::PORT_NAME => format!("{}_{}", if direction == "out" { "capture" } else { "playback" }, channel),
        });
    }
    let keyboard = server.add_port(properties! {
        keys::NODE_ID => "41",
        keys::PORT_DIRECTION => "out",
        keys::FORMAT_DSP => "8 bit raw midi",
        keys::PORT_PHYSICAL => "true",
        keys::PORT_ALIAS => "Keystation 49",
    });

    let instance = Instance::new(server.backend())?;
    let mut client = GraphClient::builder()
        .client_name("list-ports-demo")
        .build(instance)?;

    let published = client.publish("demo-sequencer", 1, 1)?;
    let Some(node_id) = published.publication.node_id else {
        return Err("server never assigned a node id".into());
    };
    if !published.publication.ready {
        return Err("local ports did not show up in time".into());
    }

    let input = client
        .ports(Category::SoftwareMidi, node_id, Direction::Input)
        .first()
        .map(|p| p.id)
        .ok_or("published input missing from the mirror")?;
    let link = client.create_link(keyboard, input)?;
    println!("linked {} -> {}\n", link.output_port(), link.input_port());

    for kind in [MediaKind::Audio, MediaKind::Midi] {
        for direction in [Direction::Output, Direction::Input] {
            println!("{kind:?} {direction:?}:");
            for port in client.list_ports(kind, direction) {
                let origin = if port.physical { "hw" } else { "sw" };
                println!(
                    "  [{:>3}] node {:<4} {origin}  {}",
                    port.id,
                    port.node_id,
                    port.display_name()
                );
            }
        }
    }

    client.destroy_link(link);
    client.close_endpoint(published.endpoint);
    client.close();
    Ok(())
}
