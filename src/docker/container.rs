use anyhow::{Context, Result};
use bollard::models::{ContainerCreateBody, HostConfig};
use bollard::query_parameters::{
    CreateContainerOptions, InspectContainerOptions, RemoveContainerOptions,
    RemoveImageOptions, StartContainerOptions, StopContainerOptions,
};
use bollard::Docker;

use crate::worker::{HostBinding, MappedPorts};

pub struct CreatedContainer {
    pub container_id: String,
    pub mapped_ports: MappedPorts,
}

/// Create a detached container from `image`, publishing all exposed ports
/// to host-chosen ports, start it, then read back the resulting port map.
pub async fn create_and_start(
    docker: &Docker,
    image: &str,
    container_name: &str,
) -> Result<CreatedContainer> {
    let host_config = HostConfig {
        publish_all_ports: Some(true),
        ..Default::default()
    };
    let config = ContainerCreateBody {
        image: Some(image.to_string()),
        host_config: Some(host_config),
        ..Default::default()
    };
    let options = CreateContainerOptions {
        name: Some(container_name.to_string()),
        ..Default::default()
    };

    let response = docker
        .create_container(Some(options), config)
        .await
        .with_context(|| format!("creating container {container_name}"))?;
    let container_id = response.id;

    docker
        .start_container(&container_id, None::<StartContainerOptions>)
        .await
        .with_context(|| format!("starting container {container_id}"))?;

    let mapped_ports = read_port_map(docker, &container_id).await?;

    Ok(CreatedContainer {
        container_id,
        mapped_ports,
    })
}

async fn read_port_map(docker: &Docker, container_id: &str) -> Result<MappedPorts> {
    let inspect = docker
        .inspect_container(container_id, None::<InspectContainerOptions>)
        .await
        .with_context(|| format!("inspecting container {container_id}"))?;

    let mut mapped_ports = MappedPorts::new();
    if let Some(network_settings) = inspect.network_settings {
        if let Some(ports) = network_settings.ports {
            for (container_port, bindings) in ports {
                let host_bindings = bindings
                    .unwrap_or_default()
                    .into_iter()
                    .map(|b| HostBinding {
                        host_ip: b.host_ip.unwrap_or_default(),
                        host_port: b.host_port.unwrap_or_default(),
                    })
                    .collect();
                mapped_ports.insert(container_port, host_bindings);
            }
        }
    }
    Ok(mapped_ports)
}

/// Stop a container, tolerating "already stopped" (304) and "already gone"
/// (404) -- cancel must be safe to call on a task that is already winding down.
pub async fn stop(docker: &Docker, container_id: &str) -> Result<()> {
    let options = StopContainerOptions {
        t: Some(10),
        signal: None,
    };
    match docker.stop_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 304, ..
        }) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(e).context("stopping container"),
    }
}

/// Wait for the container to exit, returning its exit code.
pub async fn wait_for_exit(docker: &Docker, container_id: &str) -> Result<i64> {
    use bollard::query_parameters::WaitContainerOptions;
    use futures_util::StreamExt;

    let mut stream = docker.wait_container(container_id, None::<WaitContainerOptions>);
    match stream.next().await {
        Some(Ok(response)) => Ok(response.status_code),
        Some(Err(e)) => Err(e).context("waiting for container exit"),
        None => Ok(0),
    }
}

pub async fn remove_container(docker: &Docker, container_id: &str) -> Result<()> {
    let options = RemoveContainerOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_container(container_id, Some(options)).await {
        Ok(()) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(e).context("removing container"),
    }
}

pub async fn remove_image(docker: &Docker, image: &str) -> Result<()> {
    let options = RemoveImageOptions {
        force: true,
        ..Default::default()
    };
    match docker.remove_image(image, Some(options), None).await {
        Ok(_) => Ok(()),
        Err(bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        }) => Ok(()),
        Err(e) => Err(e).context("removing image"),
    }
}
