#![cfg(all(test, not(target_arch = "wasm32")))]

use crate::fixtures::{
    init_logging, ConsumerThread, DecodedImage, Image, ImageLoader, ImageSource, Material,
    MaterialProps, Texture, TextureProps, IMAGE,
};
use futures::FutureExt;
use parking_lot::Mutex;
use resource::{
    LoadStatus, LocalResourceManager, ResourceClass, ResourceError, ResourceManager,
    ResourceOptions, SyncResourceManager, Thread,
};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;

fn image(manager: &mut ResourceManager, width: u32, height: u32) -> Image {
    let id = manager
        .create_resource(
            Thread::Render,
            IMAGE,
            ImageSource { width, height },
            ResourceOptions::default(),
        )
        .expect("create image");
    Image::from_id(id)
}

fn render_link() -> (ResourceManager, LocalResourceManager, ImageLoader) {
    init_logging();
    let mut manager = ResourceManager::default();
    manager.register_resource_type(IMAGE);
    let mut local = manager.connect(Thread::Render).expect("connect render");
    let loader = ImageLoader::default();
    local.register_loader(IMAGE, loader.clone());
    (manager, local, loader)
}

/// Producer on the test thread, render consumer on its own thread.
fn render_pair() -> (ResourceManager, ConsumerThread, ImageLoader) {
    let (manager, local, loader) = render_link();
    (manager, ConsumerThread::spawn(local), loader)
}

fn material_graph(manager: &mut ResourceManager) -> (Material, Texture, Image) {
    let image = image(manager, 4, 4);
    let texture = Texture::create(
        manager,
        TextureProps {
            image: Some(Some(image)),
            label: Some("albedo".to_owned()),
        },
    )
    .expect("texture");
    let material = Material::create(
        manager,
        MaterialProps {
            name: Some("gold".to_owned()),
            base_color_texture: Some(Some(texture)),
            ..Default::default()
        },
    )
    .expect("material");
    (material, texture, image)
}

#[test]
fn render_thread_sees_the_whole_material_graph() {
    let (mut manager, render, loader) = render_pair();
    manager.set_tick(1);
    let (material, texture, image) = material_graph(&mut manager);
    let mut loaded = manager.wait_for_resource(image.id());
    manager.flush().expect("flush");
    manager.commit().expect("commit");

    let seen = render.with(move |local| {
        local.update(1).expect("update");
        let texture_of = material.base_color_texture(&*local).expect("material");
        let image_of = texture.image(&*local).expect("texture");
        let label = texture.label(&*local).expect("label").to_owned();
        let pixels = local
            .local::<DecodedImage>(image.id())
            .map(|decoded| decoded.pixels.len());
        (texture_of, image_of, label, pixels)
    });
    assert_eq!(seen, (Some(texture), Some(image), "albedo".to_owned(), Some(64)));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);

    assert!((&mut loaded).now_or_never().is_none(), "ack not collected yet");
    manager.flush().expect("collect acks");
    assert_eq!(loaded.now_or_never(), Some(Ok(image.id())));
    assert!(manager.get_resource(image.id()).is_some_and(|r| r.is_loaded()));
}

#[test]
fn cached_images_ship_once() {
    let (mut manager, render, loader) = render_pair();
    let first = manager
        .create_resource(
            Thread::Render,
            IMAGE,
            ImageSource { width: 2, height: 2 },
            ResourceOptions::default().cache_key("textures/brick.png"),
        )
        .expect("first");
    let second = manager
        .create_resource(
            Thread::Render,
            IMAGE,
            ImageSource { width: 8, height: 8 },
            ResourceOptions::default().cache_key("textures/brick.png"),
        )
        .expect("second");
    assert_eq!(first, second);
    manager.flush().expect("flush");
    manager.commit().expect("commit");

    let images = render.with(|local| {
        local.update(0).expect("update");
        local.resources_by_type(IMAGE).count()
    });
    assert_eq!(images, 1);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn disposal_waits_for_the_consumer_to_reach_its_tick() {
    let (mut manager, render, loader) = render_pair();
    manager.set_tick(1);
    let (material, texture, image) = material_graph(&mut manager);
    manager.flush().expect("flush");
    manager.commit().expect("commit");
    render.update(1).expect("update");

    manager.set_tick(10);
    assert_eq!(manager.dispose_resource(material.id()), Ok(true));
    assert!(manager.get_resource(texture.id()).is_none(), "cascade");
    assert!(manager.get_resource(image.id()).is_none(), "cascade");
    manager.flush().expect("flush");
    manager.commit().expect("commit");

    let at_nine = render.with(move |local| {
        local.update(9).expect("update");
        (
            local.load_status(material.id()),
            local.load_status(image.id()),
            local.local::<DecodedImage>(image.id()).is_some(),
            material.base_color_texture(&*local).ok(),
        )
    });
    assert_eq!(
        at_nine,
        (
            Some(LoadStatus::Disposed),
            Some(LoadStatus::Disposed),
            true,
            Some(Some(texture)),
        )
    );
    assert_eq!(loader.disposals.load(Ordering::SeqCst), 0);

    let at_ten = render.with(move |local| {
        local.update(10).expect("update");
        [material.id(), texture.id(), image.id()].map(|id| local.get_resource(id).is_none())
    });
    assert_eq!(at_ten, [true; 3]);
    assert_eq!(loader.disposals.load(Ordering::SeqCst), 1);
}

#[test]
fn disposing_before_load_rejects_waiters_and_skips_the_loader() {
    let (mut manager, render, loader) = render_pair();
    let image = image(&mut manager, 4, 4);
    let waiting = manager.wait_for_resource(image.id());
    assert_eq!(manager.dispose_resource(image.id()), Ok(true));
    assert_eq!(
        waiting.now_or_never(),
        Some(Err(ResourceError::Disposed(image.id())))
    );

    manager.flush().expect("flush");
    manager.commit().expect("commit");
    let present = render.with(move |local| {
        local.update(0).expect("update");
        local.get_resource(image.id()).is_some()
    });
    assert!(!present);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 0);
    assert_eq!(loader.disposals.load(Ordering::SeqCst), 0);
}

#[test]
fn waiting_spans_every_connected_consumer() {
    init_logging();
    let mut manager = ResourceManager::default();
    let render = ConsumerThread::spawn(manager.connect(Thread::Render).expect("render"));
    let main = ConsumerThread::spawn(manager.connect(Thread::Main).expect("main"));

    let material = Material::create(&mut manager, MaterialProps::default()).expect("material");
    let mut loaded = manager.wait_for_resource(material.id());
    manager.flush().expect("flush");
    manager.commit().expect("commit");

    render.update(0).expect("render update");
    manager.flush().expect("flush");
    assert!((&mut loaded).now_or_never().is_none(), "main has not loaded yet");

    main.update(0).expect("main update");
    manager.flush().expect("flush");
    assert_eq!(loaded.now_or_never(), Some(Ok(material.id())));

    manager
        .set_prop_from_script(material.id(), "metallic_factor", 0.25f32.into())
        .expect("script write");
    manager.commit().expect("commit");
    let metallic = main.with(move |local| {
        local.update(1).expect("main update");
        material.metallic_factor(&*local)
    });
    assert_eq!(metallic, Ok(0.25));
}

#[test]
fn a_failed_load_rejects_the_waiter() {
    let (mut manager, render, _loader) = render_pair();
    let broken = image(&mut manager, 0, 0);
    let waiting = manager.wait_for_resource(broken.id());
    manager.flush().expect("flush");
    manager.commit().expect("commit");

    let status = render.with(move |local| {
        local.update(0).expect("update");
        local.load_status(broken.id())
    });
    assert!(matches!(status, Some(LoadStatus::Failed(_))));

    manager.flush().expect("flush");
    assert!(matches!(
        futures::executor::block_on(waiting),
        Err(ResourceError::LoadFailed { id, .. }) if id == broken.id()
    ));
}

#[test]
fn free_running_consumer_converges_on_the_producer() {
    const TICKS: u32 = 200;
    const LIVE: usize = 5;
    let (mut manager, local, loader) = render_link();

    let tick = Arc::new(AtomicU32::new(0));
    let done = Arc::new(AtomicBool::new(false));
    let consumer = {
        let tick = Arc::clone(&tick);
        let done = Arc::clone(&done);
        thread::spawn(move || -> LocalResourceManager {
            let mut local = local;
            loop {
                let finished = done.load(Ordering::Acquire);
                local
                    .update(tick.load(Ordering::Acquire))
                    .expect("consumer update");
                if finished {
                    break local;
                }
                thread::yield_now();
            }
        })
    };

    let mut live = Vec::new();
    for frame in 1..=TICKS {
        manager.set_tick(frame);
        live.push(image(&mut manager, 2, 2));
        if live.len() > LIVE {
            let retired = live.remove(0);
            assert_eq!(manager.dispose_resource(retired.id()), Ok(true));
        }
        manager.flush().expect("flush");
        manager.commit().expect("commit");
        tick.store(frame, Ordering::Release);
    }
    done.store(true, Ordering::Release);

    let local = consumer.join().expect("consumer thread");
    let mut remaining: Vec<_> = local.resources_by_type(IMAGE).map(|r| r.id()).collect();
    remaining.sort_unstable();
    let expected: Vec<_> = live.iter().map(|image| image.id()).collect();
    assert_eq!(remaining, expected);
    assert_eq!(
        loader.loads.load(Ordering::SeqCst) - loader.disposals.load(Ordering::SeqCst),
        LIVE
    );

    manager.flush().expect("collect acks");
    assert!(live
        .iter()
        .all(|image| manager.get_resource(image.id()).is_some_and(|r| r.is_loaded())));
}

#[test]
fn shared_producer_survives_concurrent_retain_release() {
    const THREADS: usize = 4;
    const ROUNDS: usize = 1_000;
    let shared = SyncResourceManager::default();
    let material = shared
        .with(|manager| Material::create(manager, MaterialProps::default()))
        .expect("material");
    assert_eq!(shared.with(|manager| manager.add_resource_ref(material.id())), Ok(1));

    let peak = Arc::new(Mutex::new(0u32));
    let workers: Vec<_> = (0..THREADS)
        .map(|_| {
            let shared = shared.clone();
            let peak = Arc::clone(&peak);
            thread::spawn(move || {
                for _ in 0..ROUNDS {
                    let count = shared
                        .with(|manager| manager.add_resource_ref(material.id()))
                        .expect("retain");
                    {
                        let mut peak = peak.lock();
                        *peak = (*peak).max(count);
                    }
                    let disposed = shared
                        .with(|manager| manager.dispose_resource(material.id()))
                        .expect("release");
                    assert!(!disposed, "the test thread still holds a reference");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().expect("worker");
    }

    assert!(*peak.lock() >= 2);
    let manager = shared.lock();
    assert_eq!(
        manager.get_resource(material.id()).map(|r| r.ref_count()),
        Some(1)
    );
    drop(manager);
    assert_eq!(shared.with(|manager| manager.dispose_resource(material.id())), Ok(true));
    assert!(shared.lock().is_empty());
}

// Must be marked #[ignore] and prefixed with "slow_"
#[test]
#[ignore]
fn slow_churn_many_ticks() {
    let (mut manager, render, loader) = render_pair();
    for frame in 1..=10_000u32 {
        manager.set_tick(frame);
        let image = image(&mut manager, 1, 1);
        manager.dispose_resource(image.id()).expect("dispose");
        manager.flush().expect("flush");
        manager.commit().expect("commit");
        render.update(frame).expect("update");
    }
    assert!(render.with(|local| local.is_empty()));
    assert_eq!(
        loader.loads.load(Ordering::SeqCst),
        loader.disposals.load(Ordering::SeqCst)
    );
}
